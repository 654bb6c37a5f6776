//! The preparer: rewrites a compiled code's symbolic stream into
//! dispatch-ready machine code.
//!
//! Two passes over the stream:
//!
//! *Pass 1 — measurement and handler installation.* Decode each header with
//! its table width, install the handler token, validate every operand that
//! can be validated statically (literal indices and kinds, register ranges,
//! branch targets, unwind types), and count the reference slots the
//! reference-producing opcode classes will need. All failure happens here;
//! pass 2 is infallible, so a machine code is produced atomically or not at
//! all.
//!
//! *Pass 2 — operand rewriting and site installation.* Bias register
//! operands by the method's stack size so registers and operand stack share
//! one contiguous index space, resolve literal indices into literal
//! references, box immediates, install nil tokens, and allocate the call
//! sites, constant caches, unwind sites, and measurement counters — heap
//! objects whose handles land in the operand words and whose positions land
//! in the reference-slot array.
//!
//! After `prepare` returns, no operand word needs a further table lookup:
//! every dispatch is one handler-table index plus immediate operand reads.

use crate::call_site::{CallSite, CallSiteFlags};
use crate::constant_cache::ConstantCache;
use crate::machine_code::{MachineCode, MachineCodeBuilder};
use crate::state::State;
use crate::stats::Measurement;
use crate::unwind::{UnwindSite, UnwindType};
use garnet_compiler::bytecode::Opcode;
use garnet_compiler::CompiledCode;
use garnet_core::{PrepareError, Symbol, Value};
use std::sync::Arc;

/// Opcode classes that record one reference slot each.
fn counts_reference(op: Opcode) -> bool {
    matches!(
        op,
        Opcode::CreateBlock
            | Opcode::PushLiteral
            | Opcode::PushMemo
            | Opcode::CheckSerial
            | Opcode::CheckSerialPrivate
            | Opcode::SendSuperStackWithBlock
            | Opcode::SendSuperStackWithSplat
            | Opcode::ZSuper
            | Opcode::SendVcall
            | Opcode::SendMethod
            | Opcode::SendStack
            | Opcode::SendStackWithBlock
            | Opcode::SendStackWithSplat
            | Opcode::ObjectToS
            | Opcode::PushConst
            | Opcode::FindConst
            | Opcode::SetupUnwind
            | Opcode::Unwind
            | Opcode::BIfSerial
            | Opcode::RLoadLiteral
    )
}

pub fn prepare(
    state: &mut State,
    code: &Arc<CompiledCode>,
) -> Result<Arc<MachineCode>, PrepareError> {
    let total = code.opcodes.len();
    let mut builder = MachineCode::builder(code);

    // Pass 1.
    let mut decoded: Vec<(usize, Opcode)> = Vec::new();
    let mut headers = vec![false; total];
    let mut branch_checks: Vec<(usize, usize)> = Vec::new();
    let mut reference_count = 0usize;

    let mut ip = 0;
    while ip < total {
        let word = code.opcodes[ip];
        let op = Opcode::from_word(word).ok_or(PrepareError::UnknownOpcode { word, ip })?;
        let width = op.width();
        if ip + width > total {
            return Err(PrepareError::TruncatedInstruction {
                opcode: op.name(),
                ip,
            });
        }

        headers[ip] = true;
        builder.stream[ip] = op.id() as u64;
        validate_operands(state, code, op, ip, &mut branch_checks)?;
        if counts_reference(op) {
            reference_count += 1;
        }

        decoded.push((ip, op));
        ip += width;
    }

    for (ip, target) in branch_checks {
        if target >= total || !headers[target] {
            return Err(PrepareError::BadBranchTarget { target, ip });
        }
    }

    builder.references.reserve(reference_count);

    // Pass 2.
    let stack_size = code.stack_size as u64;
    let mut allow_private = false;
    let mut is_super = false;

    for &(ip, op) in &decoded {
        rewrite_registers(&mut builder, op, ip, stack_size);

        match op {
            Opcode::PushInt => {
                let raw = builder.stream[ip + 1];
                builder.stream[ip + 1] = Value::fixnum(raw as i64).raw();
            }

            Opcode::PushTaggedNil => {
                builder.stream[ip + 1] = Value::apply_nil_tag(builder.nil_id, ip as u32).raw();
            }

            Opcode::CreateBlock | Opcode::PushLiteral | Opcode::PushMemo => {
                builder.references.push(ip + 1);
                let index = builder.stream[ip + 1] as usize;
                builder.stream[ip + 1] = code.literals[index].raw();
            }

            // Symbol rewrites: symbols are immortal, no reference slot.
            Opcode::SetIvar | Opcode::PushIvar | Opcode::SetConst | Opcode::SetConstAt => {
                let index = builder.stream[ip + 1] as usize;
                builder.stream[ip + 1] = code.literals[index].raw();
            }

            Opcode::InvokePrimitive => {
                let name = literal_symbol(code, builder.stream[ip + 1] as usize);
                let invoker = state.runtime.primitives.get_invoke_stub(name);
                builder.stream[ip + 1] = invoker as u64;
            }

            Opcode::AllowPrivate => {
                allow_private = true;
            }

            Opcode::SendSuperStackWithBlock | Opcode::SendSuperStackWithSplat | Opcode::ZSuper => {
                is_super = true;
                install_call_site(state, &mut builder, code, op, ip, &mut allow_private, &mut is_super);
            }

            Opcode::SendVcall
            | Opcode::SendMethod
            | Opcode::SendStack
            | Opcode::SendStackWithBlock
            | Opcode::SendStackWithSplat
            | Opcode::ObjectToS
            | Opcode::CheckSerial
            | Opcode::CheckSerialPrivate
            | Opcode::BIfSerial => {
                install_call_site(state, &mut builder, code, op, ip, &mut allow_private, &mut is_super);
            }

            Opcode::PushConst | Opcode::FindConst => {
                builder.references.push(ip + 1);
                let name = literal_symbol(code, builder.stream[ip + 1] as usize);
                let cache = ConstantCache::empty(name, code.serial, ip as u32);
                let class = state.runtime.classes.well_known().constant_cache;
                let handle = state.runtime.heap.alloc_native(class, cache.clone());
                builder.stream[ip + 1] = handle.raw();
                builder.constant_caches.insert(ip as u32, cache);
            }

            Opcode::SetupUnwind => {
                builder.references.push(ip + 1);
                let handler_ip = builder.stream[ip + 1] as u32;
                let unwind_type = UnwindType::from_word(builder.stream[ip + 2], ip)?;
                install_unwind_site(state, &mut builder, ip, handler_ip, unwind_type);
            }

            Opcode::Unwind => {
                builder.references.push(ip + 1);
                install_unwind_site(state, &mut builder, ip, 0, UnwindType::None);
            }

            Opcode::MCounter => {
                let index = builder.measurements.len();
                builder.measurements.push(Arc::new(Measurement::new(ip as u32)));
                builder.stream[ip + 1] = index as u64;
            }

            _ => {}
        }
    }

    debug_assert_eq!(builder.references.len(), reference_count);
    Ok(builder.finish())
}

/// Register-operand biasing. The rewrite table is intrinsic to the
/// instruction set: one-operand loads bias operand 1, two-operand forms bias
/// operands 1 and 2, three-operand forms bias all three.
fn rewrite_registers(builder: &mut MachineCodeBuilder, op: Opcode, ip: usize, stack_size: u64) {
    match op {
        Opcode::BIfSerial => {
            builder.stream[ip + 2] += stack_size;
        }

        Opcode::BIf
        | Opcode::RLoadLocal
        | Opcode::RStoreLocal
        | Opcode::RLoadStack
        | Opcode::RStoreStack
        | Opcode::RLoadSelf
        | Opcode::RLoadNeg1
        | Opcode::RLoad0
        | Opcode::RLoad1
        | Opcode::RLoad2
        | Opcode::RLoadTrue
        | Opcode::RLoadFalse
        | Opcode::RRet
        | Opcode::MLog => {
            builder.stream[ip + 1] += stack_size;
        }

        Opcode::RLoadNil => {
            builder.stream[ip + 1] += stack_size;
            builder.stream[ip + 2] = Value::apply_nil_tag(builder.nil_id, ip as u32).raw();
        }

        Opcode::RLoadLiteral => {
            builder.references.push(ip + 2);
            let index = builder.stream[ip + 2] as usize;
            builder.stream[ip + 2] = builder.code.literals[index].raw();
            builder.stream[ip + 1] += stack_size;
        }

        Opcode::IntNeg | Opcode::IntNot => {
            builder.stream[ip + 1] += stack_size;
            builder.stream[ip + 2] += stack_size;
        }

        Opcode::IntAdd
        | Opcode::IntSub
        | Opcode::IntMul
        | Opcode::IntDiv
        | Opcode::IntEq
        | Opcode::IntLt
        | Opcode::IntLe => {
            builder.stream[ip + 1] += stack_size;
            builder.stream[ip + 2] += stack_size;
            builder.stream[ip + 3] += stack_size;
        }

        _ => {}
    }
}

/// Create and install an empty call site for a send, serial-check, or
/// branch-on-serial instruction, consuming the sticky privacy/super flags.
fn install_call_site(
    state: &mut State,
    builder: &mut MachineCodeBuilder,
    code: &Arc<CompiledCode>,
    op: Opcode,
    ip: usize,
    allow_private: &mut bool,
    is_super: &mut bool,
) {
    builder.references.push(ip + 1);

    let name = literal_symbol(code, builder.stream[ip + 1] as usize);
    let mut flags = CallSiteFlags::default();

    match op {
        Opcode::SendVcall => {
            *allow_private = true;
            flags |= CallSiteFlags::VCALL;
        }
        Opcode::ObjectToS | Opcode::BIfSerial | Opcode::CheckSerialPrivate => {
            *allow_private = true;
        }
        _ => {}
    }

    if *allow_private {
        flags |= CallSiteFlags::PRIVATE;
    }
    if *is_super {
        flags |= CallSiteFlags::SUPER;
    }

    let site = CallSite::empty(name, code.serial, ip as u32, flags);
    let class = state.runtime.classes.well_known().call_site;
    let handle = state.runtime.heap.alloc_native(class, site.clone());
    builder.stream[ip + 1] = handle.raw();
    builder.call_sites.insert(ip as u32, site);

    *is_super = false;
    *allow_private = false;
}

fn install_unwind_site(
    state: &mut State,
    builder: &mut MachineCodeBuilder,
    ip: usize,
    handler_ip: u32,
    unwind_type: UnwindType,
) {
    let site = Arc::new(UnwindSite::new(handler_ip, unwind_type));
    let class = state.runtime.classes.well_known().unwind_site;
    let handle = state.runtime.heap.alloc_native(class, site.clone());
    builder.stream[ip + 1] = handle.raw();
    builder.unwind_sites.insert(ip as u32, site);
}

/// Pass-1 symbol fetch; validation guarantees the index and kind.
fn literal_symbol(code: &Arc<CompiledCode>, index: usize) -> Symbol {
    match code.literals[index].as_symbol() {
        Some(symbol) => symbol,
        None => Symbol::intern("<invalid>"),
    }
}

// =============================================================================
// Pass-1 validation
// =============================================================================

fn validate_operands(
    state: &State,
    code: &Arc<CompiledCode>,
    op: Opcode,
    ip: usize,
    branch_checks: &mut Vec<(usize, usize)>,
) -> Result<(), PrepareError> {
    let words = &code.opcodes;

    let literal_in_range = |index: u64| -> Result<usize, PrepareError> {
        let index = index as usize;
        if index >= code.literals.len() {
            return Err(PrepareError::LiteralOutOfRange {
                index,
                pool_size: code.literals.len(),
                ip,
            });
        }
        Ok(index)
    };

    let symbol_literal = |index: u64| -> Result<(), PrepareError> {
        let index = literal_in_range(index)?;
        if code.literals[index].as_symbol().is_none() {
            return Err(PrepareError::BadLiteralKind {
                expected: "symbol",
                ip,
            });
        }
        Ok(())
    };

    let register = |index: u64| -> Result<(), PrepareError> {
        let index = index as usize;
        if index >= code.local_count {
            return Err(PrepareError::RegisterOutOfRange {
                index,
                register_count: code.local_count,
                ip,
            });
        }
        Ok(())
    };

    match op {
        Opcode::PushLiteral | Opcode::PushMemo => {
            literal_in_range(words[ip + 1])?;
        }

        Opcode::CreateBlock => {
            let index = literal_in_range(words[ip + 1])?;
            let literal = code.literals[index];
            let heap = &state.runtime.heap;
            if heap.code_at(literal).is_none() && heap.string_at(literal).is_none() {
                return Err(PrepareError::BadLiteralKind {
                    expected: "compiled code or string",
                    ip,
                });
            }
        }

        Opcode::SendMethod
        | Opcode::SendStack
        | Opcode::SendStackWithBlock
        | Opcode::SendStackWithSplat
        | Opcode::SendSuperStackWithBlock
        | Opcode::SendSuperStackWithSplat
        | Opcode::ZSuper
        | Opcode::SendVcall
        | Opcode::ObjectToS
        | Opcode::CheckSerial
        | Opcode::CheckSerialPrivate
        | Opcode::PushConst
        | Opcode::FindConst
        | Opcode::SetConst
        | Opcode::SetConstAt
        | Opcode::SetIvar
        | Opcode::PushIvar
        | Opcode::InvokePrimitive => {
            symbol_literal(words[ip + 1])?;
        }

        Opcode::BIfSerial => {
            symbol_literal(words[ip + 1])?;
            register(words[ip + 2])?;
            branch_checks.push((ip, words[ip + 3] as usize));
        }

        Opcode::Goto | Opcode::GotoIfTrue | Opcode::GotoIfFalse => {
            branch_checks.push((ip, words[ip + 1] as usize));
        }

        Opcode::BIf => {
            register(words[ip + 1])?;
            branch_checks.push((ip, words[ip + 2] as usize));
        }

        Opcode::SetupUnwind => {
            branch_checks.push((ip, words[ip + 1] as usize));
            UnwindType::from_word(words[ip + 2], ip)?;
        }

        Opcode::PushLocal | Opcode::SetLocal => {
            register(words[ip + 1])?;
        }

        Opcode::RLoadLocal | Opcode::RStoreLocal => {
            register(words[ip + 1])?;
            register(words[ip + 2])?;
        }

        Opcode::RLoadStack
        | Opcode::RStoreStack
        | Opcode::RLoadSelf
        | Opcode::RLoadNeg1
        | Opcode::RLoad0
        | Opcode::RLoad1
        | Opcode::RLoad2
        | Opcode::RLoadTrue
        | Opcode::RLoadFalse
        | Opcode::RRet
        | Opcode::MLog => {
            register(words[ip + 1])?;
        }

        Opcode::RLoadNil => {
            register(words[ip + 1])?;
        }

        Opcode::RLoadLiteral => {
            register(words[ip + 1])?;
            literal_in_range(words[ip + 2])?;
        }

        Opcode::IntNeg | Opcode::IntNot => {
            register(words[ip + 1])?;
            register(words[ip + 2])?;
        }

        Opcode::IntAdd
        | Opcode::IntSub
        | Opcode::IntMul
        | Opcode::IntDiv
        | Opcode::IntEq
        | Opcode::IntLt
        | Opcode::IntLe => {
            register(words[ip + 1])?;
            register(words[ip + 2])?;
            register(words[ip + 3])?;
        }

        _ => {}
    }

    Ok(())
}
