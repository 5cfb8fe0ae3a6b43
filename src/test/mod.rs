//! Shared helpers for unit tests.
//!
//! - [`init_logging`] installs `env_logger` once so `RUST_LOG=cilgen=trace` works in tests,
//! - [`replay_stack`] re-derives the evaluation stack depth of a sealed body along every
//!   control-flow path, the way a verifier would,
//! - [`run`] interprets the integer subset of CIL on a sealed body, so emitted code can be
//!   checked against the semantics of the IR it came from.

use std::collections::{HashMap, VecDeque};

use crate::{
    assembly::{EmittedBody, ExceptionHandlerFlags, Immediate, Opcode, Operand, StackEffect},
    ir::Token,
};

/// Installs the test logger (ignored if another test already did)
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn index_of(body: &EmittedBody, offset: u32) -> usize {
    body.instructions
        .iter()
        .position(|i| i.offset == offset)
        .unwrap_or_else(|| panic!("no instruction at IL_{offset:04x}"))
}

fn branch_targets(operand: &Operand) -> Vec<u32> {
    match operand {
        Operand::Target(t) => vec![*t],
        Operand::Switch(targets) => targets.clone(),
        _ => Vec::new(),
    }
}

/// Replays the stack depth over all paths and returns the maximum reached.
///
/// Panics on underflow, on a join with mismatched depths, or if `ret` does not leave
/// exactly the return value. `calls` gives `(pops, pushes)` per call token.
pub fn replay_stack(
    body: &EmittedBody,
    returns_value: bool,
    calls: &HashMap<Token, (u32, u32)>,
) -> u32 {
    let mut depth_at: HashMap<usize, u32> = HashMap::new();
    let mut worklist: VecDeque<(usize, u32)> = VecDeque::new();
    worklist.push_back((0, 0));
    for region in &body.regions {
        let entry = if region.flags.contains(ExceptionHandlerFlags::FILTER)
            || region.flags == ExceptionHandlerFlags::EXCEPTION
        {
            1
        } else {
            0
        };
        worklist.push_back((index_of(body, region.handler_start), entry));
        if let Some(filter) = region.filter_start {
            worklist.push_back((index_of(body, filter), 1));
        }
    }

    let mut max = 0;
    while let Some((index, depth)) = worklist.pop_front() {
        if let Some(&seen) = depth_at.get(&index) {
            assert_eq!(seen, depth, "stack mismatch at instruction {index}");
            continue;
        }
        depth_at.insert(index, depth);
        max = max.max(depth);

        let instr = &body.instructions[index];
        let info = instr.opcode.info();
        let (pops, pushes) = match (instr.opcode, info.pops, info.pushes) {
            (Opcode::Ret, _, _) => (u32::from(returns_value), 0),
            (_, StackEffect::Fixed(p), StackEffect::Fixed(q)) => (u32::from(p), u32::from(q)),
            (_, _, _) => {
                let Operand::Token(token) = instr.operand else {
                    panic!("call without token at instruction {index}");
                };
                calls[&token]
            }
        };
        assert!(depth >= pops, "stack underflow at {instr}");
        let after = depth - pops + pushes;
        max = max.max(after);

        if instr.opcode == Opcode::Ret {
            assert_eq!(after, 0, "ret leaves values on the stack");
        }
        // leave empties the stack, the other exits have no successor
        for target in branch_targets(&instr.operand) {
            let next = if instr.opcode.info().flow == crate::assembly::FlowType::Leave {
                0
            } else {
                after
            };
            worklist.push_back((index_of(body, target), next));
        }
        if !instr.opcode.is_unconditional_exit() && index + 1 < body.instructions.len() {
            worklist.push_back((index + 1, after));
        }
    }
    max
}

/// Interprets `body` on integer arguments and returns the value `ret` leaves, if any.
///
/// Supports loads and stores of arguments and locals, integer constants, integer
/// arithmetic, comparisons and every branch form. Panics on anything else or after
/// `10_000` steps.
pub fn run(body: &EmittedBody, args: &[i64]) -> Option<i64> {
    let mut args = args.to_vec();
    let mut locals = vec![0i64; body.locals.len()];
    let mut stack: Vec<i64> = Vec::new();
    let mut pc = 0usize;

    let imm = |operand: &Operand| -> i64 {
        match operand {
            Operand::Immediate(Immediate::Int8(v)) => i64::from(*v),
            Operand::Immediate(Immediate::UInt8(v)) => i64::from(*v),
            Operand::Immediate(Immediate::UInt16(v)) => i64::from(*v),
            Operand::Immediate(Immediate::Int32(v)) => i64::from(*v),
            Operand::Immediate(Immediate::Int64(v)) => *v,
            other => panic!("no integer immediate in {other:?}"),
        }
    };

    for _ in 0..10_000 {
        let instr = &body.instructions[pc];
        let mut next = pc + 1;
        let mut pop = || stack.pop().expect("stack underflow");
        let mut jump_if = |cond: bool| {
            if cond {
                let Operand::Target(t) = instr.operand else {
                    panic!("branch without target");
                };
                next = index_of(body, t);
            }
        };

        use Opcode::*;
        match instr.opcode {
            Nop => {}
            Ldarg0 | Ldarg1 | Ldarg2 | Ldarg3 => {
                let i = instr.opcode as usize - Ldarg0 as usize;
                stack.push(args[i]);
            }
            LdargS | Ldarg => stack.push(args[imm(&instr.operand) as usize]),
            StargS | Starg => {
                let v = pop();
                args[imm(&instr.operand) as usize] = v;
            }
            Ldloc0 | Ldloc1 | Ldloc2 | Ldloc3 => {
                let i = instr.opcode as usize - Ldloc0 as usize;
                stack.push(locals[i]);
            }
            LdlocS | Ldloc => stack.push(locals[imm(&instr.operand) as usize]),
            Stloc0 | Stloc1 | Stloc2 | Stloc3 => {
                let i = instr.opcode as usize - Stloc0 as usize;
                locals[i] = pop();
            }
            StlocS | Stloc => {
                let v = pop();
                locals[imm(&instr.operand) as usize] = v;
            }
            LdcI4M1 => stack.push(-1),
            LdcI4_0 | LdcI4_1 | LdcI4_2 | LdcI4_3 | LdcI4_4 | LdcI4_5 | LdcI4_6 | LdcI4_7
            | LdcI4_8 => stack.push(instr.opcode as i64 - LdcI4_0 as i64),
            LdcI4S | LdcI4 | LdcI8 => stack.push(imm(&instr.operand)),
            Ldnull => stack.push(0),
            Dup => {
                let v = pop();
                stack.push(v);
                stack.push(v);
            }
            Pop => {
                pop();
            }
            Add | Sub | Mul | Div | Rem | And | Or | Xor | Shl | Shr | Ceq | Cgt | Clt
            | CgtUn | CltUn => {
                let b = pop();
                let a = pop();
                let r = match instr.opcode {
                    Add => a.wrapping_add(b),
                    Sub => a.wrapping_sub(b),
                    Mul => a.wrapping_mul(b),
                    Div => a / b,
                    Rem => a % b,
                    And => a & b,
                    Or => a | b,
                    Xor => a ^ b,
                    Shl => a << b,
                    Shr => a >> b,
                    Ceq => i64::from(a == b),
                    Cgt => i64::from(a > b),
                    Clt => i64::from(a < b),
                    CgtUn => i64::from((a as u64) > (b as u64)),
                    _ => i64::from((a as u64) < (b as u64)),
                };
                stack.push(r);
            }
            Neg => {
                let a = pop();
                stack.push(a.wrapping_neg());
            }
            Not => {
                let a = pop();
                stack.push(!a);
            }
            ConvI4 | ConvI8 => {}
            Br | BrS => jump_if(true),
            Brtrue | BrtrueS => {
                let v = pop();
                jump_if(v != 0);
            }
            Brfalse | BrfalseS => {
                let v = pop();
                jump_if(v == 0);
            }
            Beq | BeqS | BneUn | BneUnS | Bge | BgeS | Bgt | BgtS | Ble | BleS | Blt | BltS
            | BgeUn | BgeUnS | BgtUn | BgtUnS | BleUn | BleUnS | BltUn | BltUnS => {
                let b = pop();
                let a = pop();
                let (ua, ub) = (a as u64, b as u64);
                let taken = match instr.opcode {
                    Beq | BeqS => a == b,
                    BneUn | BneUnS => a != b,
                    Bge | BgeS => a >= b,
                    Bgt | BgtS => a > b,
                    Ble | BleS => a <= b,
                    Blt | BltS => a < b,
                    BgeUn | BgeUnS => ua >= ub,
                    BgtUn | BgtUnS => ua > ub,
                    BleUn | BleUnS => ua <= ub,
                    _ => ua < ub,
                };
                jump_if(taken);
            }
            Switch => {
                let v = pop();
                let Operand::Switch(targets) = &instr.operand else {
                    panic!("switch without table");
                };
                if let Some(t) = usize::try_from(v).ok().and_then(|i| targets.get(i)) {
                    next = index_of(body, *t);
                }
            }
            Ret => return stack.pop(),
            other => panic!("cannot interpret {other}"),
        }
        pc = next;
    }
    panic!("step limit exceeded");
}
