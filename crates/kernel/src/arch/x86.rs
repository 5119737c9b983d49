//! 32-bit x86 trap stubs and the return path into user mode.
//!
//! Each stub saves the general purpose registers with `pushad` so that, together
//! with the frame pushed by the CPU, they form a [`TrapFrame`]. Descriptor tables
//! are set up by the boot code; it points IDT gates at the exported
//! `cinder_trap_*` symbols.

use core::arch::{asm, global_asm};

use super::park;
use crate::interrupts::{InterruptVector, TrapFrame};
use crate::kernel::{self, Kernel, TrapOutcome};
use crate::task::{RegisterState, TaskId};

const PIC1_COMMAND: u16 = 0x20;
const PIC2_COMMAND: u16 = 0xA0;
const PIC_EOI: u8 = 0x20;

/// First vector the remapped PICs raise.
const PIC_BASE: u8 = 0x20;

macro_rules! trap_stub {
    ($name:literal, $vector:literal) => {
        global_asm!(
            concat!(".global ", $name),
            concat!($name, ":"),
            "pushad",
            "push esp",
            concat!("push ", $vector),
            "call {entry}",
            "add esp, 8",
            "popad",
            "iretd",
            entry = sym trap_entry,
        );
    };
    ($name:literal, $vector:literal, error_code) => {
        global_asm!(
            concat!(".global ", $name),
            concat!($name, ":"),
            "add esp, 4",
            "pushad",
            "push esp",
            concat!("push ", $vector),
            "call {entry}",
            "add esp, 8",
            "popad",
            "iretd",
            entry = sym trap_entry,
        );
    };
}

trap_stub!("cinder_trap_divide_error", 0x00);
trap_stub!("cinder_trap_debug", 0x01);
trap_stub!("cinder_trap_nmi", 0x02);
trap_stub!("cinder_trap_breakpoint", 0x03);
trap_stub!("cinder_trap_overflow", 0x04);
trap_stub!("cinder_trap_bound_range", 0x05);
trap_stub!("cinder_trap_invalid_opcode", 0x06);
trap_stub!("cinder_trap_device_not_available", 0x07);
trap_stub!("cinder_trap_double_fault", 0x08, error_code);
trap_stub!("cinder_trap_invalid_tss", 0x0A, error_code);
trap_stub!("cinder_trap_segment_not_present", 0x0B, error_code);
trap_stub!("cinder_trap_stack_segment", 0x0C, error_code);
trap_stub!("cinder_trap_general_protection", 0x0D, error_code);
trap_stub!("cinder_trap_page_fault", 0x0E, error_code);
trap_stub!("cinder_trap_x87_floating_point", 0x10);
trap_stub!("cinder_trap_alignment_check", 0x11, error_code);
trap_stub!("cinder_trap_machine_check", 0x12);
trap_stub!("cinder_trap_simd_floating_point", 0x13);
trap_stub!("cinder_trap_timer", 0x20);
trap_stub!("cinder_trap_keyboard", 0x21);
trap_stub!("cinder_trap_syscall", 0x80);

// Loads a saved register set and drops to ring 3. Offsets follow `RegisterState`.
global_asm!(
    ".global cinder_task_return",
    "cinder_task_return:",
    "mov ebp, [esp + 4]",
    "mov ax, [ebp + 44]",
    "mov ds, ax",
    "mov es, ax",
    "mov fs, ax",
    "mov gs, ax",
    "push dword ptr [ebp + 44]",
    "push dword ptr [ebp + 40]",
    "push dword ptr [ebp + 36]",
    "push dword ptr [ebp + 32]",
    "push dword ptr [ebp + 28]",
    "mov edi, [ebp + 0]",
    "mov esi, [ebp + 4]",
    "mov ebx, [ebp + 12]",
    "mov edx, [ebp + 16]",
    "mov ecx, [ebp + 20]",
    "mov eax, [ebp + 24]",
    "mov ebp, [ebp + 8]",
    "iretd",
);

unsafe extern "C" {
    fn cinder_task_return(registers: *const RegisterState) -> !;
}

extern "C" fn trap_entry(vector: u32, frame: &mut TrapFrame) {
    let vector = InterruptVector::new(vector as u8);
    acknowledge(vector);

    match kernel::with_kernel(|kernel| kernel.handle_trap(vector, frame)) {
        Some(TrapOutcome::Return(word)) => frame.eax = word,
        Some(TrapOutcome::Resume(task)) => resume(task),
        Some(TrapOutcome::Halt) => {
            log::error!("no task left to run, halting");
            park()
        }
        None => {
            log::error!("{} before the kernel was installed", vector);
            park()
        }
    }
}

/// Tells the PICs a hardware interrupt has been handled.
fn acknowledge(vector: InterruptVector) {
    let value = vector.value();
    if !(PIC_BASE..PIC_BASE + 16).contains(&value) {
        return;
    }

    // SAFETY: writing EOI to the PIC command ports has no other effect.
    unsafe {
        if value >= PIC_BASE + 8 {
            asm!("out dx, al", in("dx") PIC2_COMMAND, in("al") PIC_EOI, options(nomem, nostack));
        }
        asm!("out dx, al", in("dx") PIC1_COMMAND, in("al") PIC_EOI, options(nomem, nostack));
    }
}

/// Jumps into `task` using its saved registers. Its address space is already
/// active.
fn resume(task: TaskId) -> ! {
    let registers = kernel::with_kernel(|kernel| {
        kernel.scheduler().task(task).map(|task| *task.registers())
    })
    .flatten();

    match registers {
        // SAFETY: the kernel lock is released and the registers describe a ring 3
        // context mapped in the active address space.
        Some(registers) => unsafe { cinder_task_return(&registers) },
        None => {
            log::error!("{} vanished before it could resume", task);
            park()
        }
    }
}

/// Turns paging on, publishes `kernel` to the trap stubs and runs its first task.
pub fn start(kernel: Kernel) -> ! {
    // SAFETY: the kernel address space identity maps all memory.
    unsafe { kernel.enable_paging() };
    kernel::install(kernel);

    match kernel::with_kernel(Kernel::run_first_task) {
        Some(TrapOutcome::Resume(task)) => resume(task),
        _ => {
            log::error!("no program to run, halting");
            park()
        }
    }
}
