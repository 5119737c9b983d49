use alloc::string::String;
use alloc::vec::Vec;

use vmm::VirtualAddress;

use super::{argument, caller, reply};
use crate::config::{ARGUMENT_SIZE, MAX_ARGUMENTS, MAX_PATH};
use crate::error::KernelError;
use crate::fs::program_path;
use crate::interrupts::TrapFrame;
use crate::kernel::Kernel;
use crate::process::Process;
use crate::syscall::Disposition;
use crate::task::{Task, TaskId};

fn task_of(kernel: &Kernel, pid: usize) -> Result<TaskId, KernelError> {
    kernel
        .process(pid)
        .map(Process::task)
        .ok_or(KernelError::InvalidArgument)
}

fn resume(result: Result<TaskId, KernelError>) -> Disposition {
    match result {
        Ok(task) => Disposition::Resume(task),
        Err(err) => reply(Err(err)),
    }
}

/// `process_load_start(const char *filename)`: runs a program from the boot drive
/// in place of the caller.
pub fn load_start(kernel: &mut Kernel, _frame: &TrapFrame) -> Disposition {
    resume(start_program(kernel))
}

fn start_program(kernel: &mut Kernel) -> Result<TaskId, KernelError> {
    let ptr = argument(kernel, 0)?;
    let name = caller(kernel)?.copy_string(VirtualAddress::from(ptr), MAX_PATH)?;
    let path = program_path(&name)?;

    let pid = kernel.load_and_switch(&path)?;
    task_of(kernel, pid)
}

/// `system(struct command_argument *arguments)`: runs the program named by the
/// first argument with the whole list as its `argv`.
pub fn invoke_system_command(kernel: &mut Kernel, _frame: &TrapFrame) -> Disposition {
    resume(run_command(kernel))
}

fn run_command(kernel: &mut Kernel) -> Result<TaskId, KernelError> {
    let list = argument(kernel, 0)?;
    let args = read_argument_list(caller(kernel)?, list)?;
    let program = match args.first() {
        Some(program) if !program.is_empty() => program,
        _ => return Err(KernelError::InvalidArgument),
    };

    let path = program_path(program)?;
    let pid = kernel.load(&path)?;

    let argv: Vec<&str> = args.iter().map(String::as_str).collect();
    if let Err(err) = kernel.inject_arguments(pid, &argv) {
        log::warn!("process {}: argument setup failed: {}", pid, err);
        if let Err(err) = kernel.terminate(pid) {
            log::error!("process {}: terminate failed: {}", pid, err);
        }
        return Err(err);
    }

    let task = task_of(kernel, pid)?;
    kernel.scheduler.switch_to(task);
    Ok(task)
}

/// Walks a user linked list of fixed-size argument nodes. Each node holds a
/// NUL-terminated argument followed by a pointer to the next node.
fn read_argument_list(task: &Task, mut node: u32) -> Result<Vec<String>, KernelError> {
    let mut args = Vec::new();
    while node != 0 && args.len() < MAX_ARGUMENTS {
        let addr = VirtualAddress::from(node);
        args.push(task.copy_string(addr, ARGUMENT_SIZE)?);
        node = task.read_word(addr + ARGUMENT_SIZE)?;
    }
    Ok(args)
}

/// `process_get_arguments(struct process_arguments *out)`
pub fn get_program_arguments(kernel: &mut Kernel, _frame: &TrapFrame) -> Disposition {
    reply(argument(kernel, 0).and_then(|ptr| {
        let (argc, argv) = kernel
            .current_process()
            .ok_or(KernelError::InvalidArgument)?
            .arguments();

        let out = VirtualAddress::from(ptr);
        let task = caller(kernel)?;
        task.write_word(out, argc)?;
        task.write_word(out + 4, argv.as_u32())?;
        Ok(0)
    }))
}

/// `exit()`: terminates the caller and runs whatever is next.
pub fn exit(kernel: &mut Kernel, _frame: &TrapFrame) -> Disposition {
    let Some(pid) = kernel.current_process().map(Process::id) else {
        return Disposition::Halt;
    };

    if let Err(err) = kernel.terminate(pid) {
        log::error!("process {}: terminate failed: {}", pid, err);
    }

    match kernel.scheduler.current() {
        Some(task) => {
            kernel.scheduler.switch_to(task);
            Disposition::Resume(task)
        }
        None => Disposition::Halt,
    }
}

#[cfg(test)]
mod tests {
    use vmm::VirtualAddress;

    use crate::error::KernelError;
    use crate::kernel::TrapOutcome;
    use crate::syscall::Command;
    use crate::testing;

    #[test]
    fn load_start_resumes_new_program() {
        let (mut kernel, _) = testing::kernel_with_program();
        let name = testing::user_string(&mut kernel, "blank.bin");
        let frame = testing::syscall_frame(&kernel, Command::ProcessLoadStart, &[name]);

        let TrapOutcome::Resume(task) = kernel.handle_syscall(&frame) else {
            panic!("load start did not switch");
        };
        assert_eq!(kernel.scheduler().current(), Some(task));
        assert_eq!(kernel.current_process().unwrap().filename(), "0:/blank.bin");
        assert_eq!(kernel.process_count(), 2);
    }

    #[test]
    fn load_start_of_missing_program_returns_status() {
        let (mut kernel, _) = testing::kernel_with_program();
        let name = testing::user_string(&mut kernel, "nope.bin");
        let frame = testing::syscall_frame(&kernel, Command::ProcessLoadStart, &[name]);

        assert_eq!(
            kernel.handle_syscall(&frame),
            TrapOutcome::Return(KernelError::Io.as_word())
        );
        assert_eq!(kernel.process_count(), 1);
    }

    #[test]
    fn load_start_of_empty_name_is_bad_path() {
        let (mut kernel, _) = testing::kernel_with_program();
        let name = testing::user_string(&mut kernel, "");
        let frame = testing::syscall_frame(&kernel, Command::ProcessLoadStart, &[name]);

        assert_eq!(
            kernel.handle_syscall(&frame),
            TrapOutcome::Return(KernelError::BadPath.as_word())
        );
    }

    #[test]
    fn system_command_passes_arguments() {
        let (mut kernel, _) = testing::kernel_with_program();
        let list = testing::user_argument_list(&mut kernel, &["blank.bin", "-x", "file"]);
        let frame = testing::syscall_frame(&kernel, Command::InvokeSystemCommand, &[list]);

        let TrapOutcome::Resume(task) = kernel.handle_syscall(&frame) else {
            panic!("system command did not switch");
        };
        let process = kernel.current_process().unwrap();
        let (argc, argv) = process.arguments();
        assert_eq!(argc, 3);

        let task = kernel.scheduler().task(task).unwrap();
        let first = task.read_word(argv).unwrap();
        let third = task.read_word(argv + 8).unwrap();
        assert_eq!(
            task.copy_string(VirtualAddress::from(first), 64).unwrap(),
            "blank.bin"
        );
        assert_eq!(
            task.copy_string(VirtualAddress::from(third), 64).unwrap(),
            "file"
        );
    }

    #[test]
    fn system_command_without_program_is_rejected() {
        let (mut kernel, _) = testing::kernel_with_program();
        let list = testing::user_argument_list(&mut kernel, &["", "-x"]);
        let frame = testing::syscall_frame(&kernel, Command::InvokeSystemCommand, &[list]);

        assert_eq!(
            kernel.handle_syscall(&frame),
            TrapOutcome::Return(KernelError::InvalidArgument.as_word())
        );
        assert_eq!(kernel.process_count(), 1);

        let frame = testing::syscall_frame(&kernel, Command::InvokeSystemCommand, &[0]);
        assert_eq!(
            kernel.handle_syscall(&frame),
            TrapOutcome::Return(KernelError::InvalidArgument.as_word())
        );
    }

    #[test]
    fn reports_program_arguments() {
        let (mut kernel, _) = testing::kernel_with_program();
        kernel.inject_arguments(0, &["blank.bin", "one"]).unwrap();
        let out = kernel.malloc(0, 8).unwrap();

        let frame = testing::syscall_frame(&kernel, Command::GetProgramArguments, &[out.as_u32()]);
        assert_eq!(kernel.handle_syscall(&frame), TrapOutcome::Return(0));

        let (argc, argv) = kernel.process(0).unwrap().arguments();
        let task = kernel.scheduler().current_task().unwrap();
        assert_eq!(task.read_word(out), Ok(argc));
        assert_eq!(task.read_word(out + 4), Ok(argv.as_u32()));
    }

    #[test]
    fn exit_resumes_next_process() {
        let (mut kernel, _) = testing::kernel_with_program();
        let second = kernel.load("0:/blank.bin").unwrap();
        let second_task = kernel.process(second).unwrap().task();

        let frame = testing::syscall_frame(&kernel, Command::Exit, &[]);
        assert_eq!(kernel.handle_syscall(&frame), TrapOutcome::Resume(second_task));
        assert!(kernel.process(0).is_none());
        assert_eq!(kernel.current_process().unwrap().id(), second);
    }

    #[test]
    fn exit_of_last_process_halts() {
        let (mut kernel, _) = testing::kernel_with_program();
        let frame = testing::syscall_frame(&kernel, Command::Exit, &[]);
        assert_eq!(kernel.handle_syscall(&frame), TrapOutcome::Halt);
        assert_eq!(kernel.process_count(), 0);
        assert!(kernel.scheduler().is_empty());
    }
}
