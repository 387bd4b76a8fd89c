use core::arch::{asm, naked_asm};

use crate::stack;

pub unsafe fn init<S: stack::Stack>(
    stack: &S,
    entry: unsafe extern "C" fn(usize, *mut usize),
) -> *mut usize {
    unsafe fn push(mut sp: *mut usize, val: usize) -> *mut usize {
        sp = sp.offset(-1);
        *sp = val;
        sp
    }

    let mut sp = stack.bottom();
    // Keep the stack 16-byte aligned once the trampoline frames are in place.
    sp = push(sp, 0);
    // The entry function, picked up by trampoline_2's call.
    sp = push(sp, entry as usize);

    // Unwind info ends at the trampolines: the return address leading off
    // this stack is marked undefined, so the unwinder stops here instead of
    // following a link that may point at frames the resumer already left.
    #[unsafe(naked)]
    unsafe extern "C" fn trampoline_1() {
        naked_asm!(
            ".cfi_startproc",
            ".cfi_undefined rip",
            "nop",
            "nop",
            "ret",
            ".cfi_endproc",
        )
    }

    // Return frame for trampoline_2. Its link slot holds the first resumer's
    // stack pointer, written by swap_and_link_stacks, so frame-pointer
    // walkers can cross onto the caller's stack.
    sp = push(sp, trampoline_1 as usize + 2); // the ret after both nops
    sp = push(sp, 0xdead_dead_dead_0cfa);

    #[unsafe(naked)]
    unsafe extern "C" fn trampoline_2() {
        naked_asm!(
            ".cfi_startproc",
            ".cfi_undefined rip",
            "nop",
            "call [rsp + 16]",
            "ret",
            ".cfi_endproc",
        )
    }

    let frame = sp;
    sp = push(sp, trampoline_2 as usize + 1); // the call instruction
    sp = push(sp, frame as usize);

    sp
}

#[inline(always)]
pub unsafe fn swap_and_link_stacks(
    arg: usize,
    new_sp: *mut usize,
    bottom: *const usize,
) -> (usize, *mut usize) {
    let ret_val: usize;
    let ret_sp: *mut usize;

    asm!(
        // rbx can't be an asm operand on stable, preserve it by hand.
        "push rbx",
        // Continuation point for the far return back into this frame.
        "lea rax, [rip + 1337f]",
        "push rax",
        // The frame pointer can't appear in the operand list either.
        "push rbp",
        // Link the stacks: the slot written by init sits 32 bytes under the
        // bottom of the new stack.
        "mov [rcx - 32], rsp",
        // Our saved context becomes the entry function's second argument.
        "mov rsi, rsp",
        "mov rsp, rdx",
        "pop rbp",
        "pop rax",
        // pop + jmp instead of ret, the return predictor has no matching call.
        "jmp rax",
        "1337:",
        "pop rbx",
        // Everything else is clobbered; the compiler spills what it needs.
        inout("rcx") bottom => _,
        inout("rdx") new_sp => _,
        inout("rdi") arg => ret_val, // 1st argument of the entry function
        out("rsi") ret_sp, // 2nd argument of the entry function
        out("rax") _,

        out("r8") _, out("r9") _, out("r10") _, out("r11") _,
        out("r12") _, out("r13") _, out("r14") _, out("r15") _,

        out("xmm0") _, out("xmm1") _, out("xmm2") _, out("xmm3") _,
        out("xmm4") _, out("xmm5") _, out("xmm6") _, out("xmm7") _,
        out("xmm8") _, out("xmm9") _, out("xmm10") _, out("xmm11") _,
        out("xmm12") _, out("xmm13") _, out("xmm14") _, out("xmm15") _,
    );

    (ret_val, ret_sp)
}

/// Transfer to the context saved at `new_sp`, which must hold a frame pointer
/// and a continuation address at its top, in that order. `arg` arrives on the
/// other side either as the first argument of the entry function or as the
/// first element of the pair returned by the `swap` the peer is suspended in.
#[inline(always)]
pub unsafe fn swap(arg: usize, new_sp: *mut usize) -> (usize, *mut usize) {
    let ret_val: usize;
    let ret_sp: *mut usize;

    asm!(
        "push rbx",
        "lea rax, [rip + 1337f]",
        "push rax",
        "push rbp",
        "mov rsi, rsp",
        "mov rsp, rdx",
        "pop rbp",
        "pop rax",
        "jmp rax",
        "1337:",
        "pop rbx",
        inout("rdx") new_sp => _,
        inout("rdi") arg => ret_val,
        out("rsi") ret_sp,
        out("rax") _, out("rcx") _,

        out("r8") _, out("r9") _, out("r10") _, out("r11") _,
        out("r12") _, out("r13") _, out("r14") _, out("r15") _,

        out("xmm0") _, out("xmm1") _, out("xmm2") _, out("xmm3") _,
        out("xmm4") _, out("xmm5") _, out("xmm6") _, out("xmm7") _,
        out("xmm8") _, out("xmm9") _, out("xmm10") _, out("xmm11") _,
        out("xmm12") _, out("xmm13") _, out("xmm14") _, out("xmm15") _,
    );

    (ret_val, ret_sp)
}
