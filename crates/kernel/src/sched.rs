//! Round-robin scheduling over a task arena.
//!
//! Tasks live in an arena of generational slots. Scheduling order is a separate run
//! queue of ids, and "current" is just an id into it. Removing a task can therefore
//! never leave a dangling current pointer: the scheduler advances current to the
//! removed task's successor before the slot is released.

use alloc::vec::Vec;

use vmm::FrameAllocator;

use crate::interrupts::TrapFrame;
use crate::task::{Task, TaskId, TaskState};

struct Slot {
    generation: u32,
    task: Option<Task>,
}

#[derive(Default)]
pub struct Scheduler {
    slots: Vec<Slot>,
    run_queue: Vec<TaskId>,
    current: Option<TaskId>,
}

impl Scheduler {
    pub const fn new() -> Self {
        Self {
            slots: Vec::new(),
            run_queue: Vec::new(),
            current: None,
        }
    }

    /// Appends `task` to the run queue. The first task added becomes current.
    pub fn add(&mut self, task: Task) -> TaskId {
        let id = match self.slots.iter().position(|slot| slot.task.is_none()) {
            Some(index) => {
                let slot = &mut self.slots[index];
                slot.generation = slot.generation.wrapping_add(1);
                slot.task = Some(task);
                TaskId {
                    index: index as u32,
                    generation: slot.generation,
                }
            }
            None => {
                self.slots.push(Slot {
                    generation: 0,
                    task: Some(task),
                });
                TaskId {
                    index: (self.slots.len() - 1) as u32,
                    generation: 0,
                }
            }
        };

        self.run_queue.push(id);
        if self.current.is_none() {
            self.current = Some(id);
        }

        log::debug!("scheduler: added {} ({} queued)", id, self.run_queue.len());
        id
    }

    /// Removes a task and releases its address space.
    ///
    /// If the task was current, current moves to its successor (wrapping to the head)
    /// or to `None` when it was the last task. Returns false for unknown ids.
    pub fn remove<F: FrameAllocator + ?Sized>(&mut self, id: TaskId, frames: &F) -> bool {
        let Some(position) = self.run_queue.iter().position(|&queued| queued == id) else {
            return false;
        };

        if self.current == Some(id) {
            self.current = if self.run_queue.len() == 1 {
                None
            } else {
                Some(self.run_queue[(position + 1) % self.run_queue.len()])
            };
        }
        self.run_queue.remove(position);

        if let Some(task) = self.slots[id.index as usize].task.take() {
            task.destroy(frames);
        }

        log::debug!("scheduler: removed {}, current {:?}", id, self.current);
        true
    }

    /// The task after current in round-robin order.
    pub fn next(&self) -> Option<TaskId> {
        let Some(current) = self.current else {
            return self.run_queue.first().copied();
        };

        let position = self.run_queue.iter().position(|&queued| queued == current)?;
        Some(self.run_queue[(position + 1) % self.run_queue.len()])
    }

    /// Makes `id` current and installs its address space.
    ///
    /// Returns false (changing nothing) for unknown ids.
    pub fn switch_to(&mut self, id: TaskId) -> bool {
        let Some(task) = self.task(id) else {
            return false;
        };

        // SAFETY: every task space identity maps the kernel.
        unsafe { task.space().activate() };
        self.current = Some(id);
        log::trace!("scheduler: switched to {}", id);
        true
    }

    /// Reinstalls the current task's address space, if there is one.
    pub fn activate_current(&self) -> bool {
        match self.current_task() {
            Some(task) => {
                // SAFETY: every task space identity maps the kernel.
                unsafe { task.space().activate() };
                true
            }
            None => false,
        }
    }

    /// Stores the trapped registers in the current task. Returns false when nothing
    /// is running.
    pub fn save_current(&mut self, frame: &TrapFrame) -> bool {
        match self.current_task_mut() {
            Some(task) => {
                task.registers_mut().save(frame);
                true
            }
            None => false,
        }
    }

    /// Saves current and switches to the next task in round-robin order.
    pub fn preempt(&mut self, frame: &TrapFrame) -> Option<TaskId> {
        self.save_current(frame);
        let next = self.next()?;
        self.switch_to(next);
        Some(next)
    }

    pub fn state(&self, id: TaskId) -> Option<TaskState> {
        self.task(id)?;
        if self.current == Some(id) {
            Some(TaskState::Running)
        } else {
            Some(TaskState::Ready)
        }
    }

    pub fn current(&self) -> Option<TaskId> {
        self.current
    }

    pub fn current_task(&self) -> Option<&Task> {
        self.task(self.current?)
    }

    pub fn current_task_mut(&mut self) -> Option<&mut Task> {
        self.task_mut(self.current?)
    }

    pub fn task(&self, id: TaskId) -> Option<&Task> {
        let slot = self.slots.get(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        slot.task.as_ref()
    }

    pub fn task_mut(&mut self, id: TaskId) -> Option<&mut Task> {
        let slot = self.slots.get_mut(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        slot.task.as_mut()
    }

    /// Task ids in run-queue order.
    pub fn tasks(&self) -> impl Iterator<Item = TaskId> + '_ {
        self.run_queue.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.run_queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.run_queue.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing;
    use vmm::{AddressSpace, EmulatedFrames};

    fn scheduler_with(count: usize) -> (Scheduler, Vec<TaskId>) {
        testing::install_memory();
        let mut scheduler = Scheduler::new();
        let ids = (0..count)
            .map(|process| scheduler.add(Task::new(process, &EmulatedFrames).unwrap()))
            .collect();
        (scheduler, ids)
    }

    #[test]
    fn first_task_becomes_current() {
        let (scheduler, ids) = scheduler_with(2);
        assert_eq!(scheduler.current(), Some(ids[0]));
        assert_eq!(scheduler.state(ids[0]), Some(TaskState::Running));
        assert_eq!(scheduler.state(ids[1]), Some(TaskState::Ready));
    }

    #[test]
    fn round_robin_visits_every_task_once() {
        let (mut scheduler, ids) = scheduler_with(4);
        let frame = TrapFrame::default();

        let mut visited = Vec::new();
        for _ in 0..ids.len() {
            visited.push(scheduler.preempt(&frame).unwrap());
        }

        assert_eq!(visited, [ids[1], ids[2], ids[3], ids[0]]);
        assert_eq!(scheduler.current(), Some(ids[0]));
    }

    #[test]
    fn switch_installs_task_space() {
        let (mut scheduler, ids) = scheduler_with(2);
        assert!(scheduler.switch_to(ids[1]));

        let directory = scheduler.task(ids[1]).unwrap().space().directory();
        assert_eq!(AddressSpace::active(), Some(directory));
    }

    #[test]
    fn preempt_saves_outgoing_registers() {
        let (mut scheduler, ids) = scheduler_with(2);
        let frame = TrapFrame {
            eax: 42,
            ip: 0x0040_0010,
            ..TrapFrame::default()
        };

        scheduler.preempt(&frame);
        let saved = scheduler.task(ids[0]).unwrap().registers();
        assert_eq!(saved.eax, 42);
        assert_eq!(saved.ip, 0x0040_0010);
    }

    #[test]
    fn removing_current_advances_to_successor() {
        let (mut scheduler, ids) = scheduler_with(3);
        scheduler.switch_to(ids[2]);

        assert!(scheduler.remove(ids[2], &EmulatedFrames));
        assert_eq!(scheduler.current(), Some(ids[0]));
        assert_eq!(scheduler.tasks().collect::<Vec<_>>(), [ids[0], ids[1]]);
    }

    #[test]
    fn removing_last_task_clears_current() {
        let (mut scheduler, ids) = scheduler_with(1);
        assert!(scheduler.remove(ids[0], &EmulatedFrames));
        assert_eq!(scheduler.current(), None);
        assert_eq!(scheduler.next(), None);
        assert!(scheduler.is_empty());
    }

    #[test]
    fn stale_ids_do_not_resolve() {
        let (mut scheduler, ids) = scheduler_with(1);
        scheduler.remove(ids[0], &EmulatedFrames);

        let reused = scheduler.add(Task::new(7, &EmulatedFrames).unwrap());
        assert_eq!(reused.index, ids[0].index);
        assert!(scheduler.task(ids[0]).is_none());
        assert_eq!(scheduler.state(ids[0]), None);
        assert!(!scheduler.remove(ids[0], &EmulatedFrames));
        assert_eq!(scheduler.task(reused).unwrap().process(), 7);
    }

    #[test]
    fn remove_releases_address_space() {
        let (mut scheduler, ids) = scheduler_with(1);
        let before = testing::allocated_bytes();
        scheduler.remove(ids[0], &EmulatedFrames);
        assert!(testing::allocated_bytes() < before);
    }
}
