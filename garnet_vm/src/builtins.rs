//! Bootstrap methods and primitive invokers.
//!
//! Enough of a method surface to exercise dispatch: integer arithmetic on
//! the Integer class, string coercion on Object, and the invokers
//! `invoke_primitive` sites resolve at preparation.

use crate::state::State;
use garnet_core::{Symbol, Value, VmError, VmResult};
use garnet_runtime::{Arguments, Executable, Runtime, Visibility};
use std::sync::Arc;

pub fn install(state: &mut State) {
    let known = *state.runtime.classes.well_known();

    let define = |state: &State,
                  class: garnet_runtime::ClassId,
                  name: &str,
                  visibility: Visibility,
                  func: garnet_runtime::InvokePrimitive| {
        state.runtime.classes.define_method(
            class,
            Symbol::intern(name),
            visibility,
            Arc::new(Executable::Primitive {
                name: Symbol::intern(name),
                func,
            }),
        );
    };

    define(state, known.integer, "+", Visibility::Public, int_plus);
    define(state, known.integer, "*", Visibility::Public, int_times);
    define(state, known.object, "to_s", Visibility::Public, object_to_s);
    define(state, known.object, "inspect", Visibility::Public, object_inspect);
    define(state, known.string, "size", Visibility::Public, string_size);

    state
        .runtime
        .primitives
        .register(Symbol::intern("fixnum_add"), prim_fixnum_add);
    state
        .runtime
        .primitives
        .register(Symbol::intern("object_render"), prim_object_render);
}

fn fixnum_arg(args: &Arguments, index: usize) -> VmResult<i64> {
    let value = args
        .args
        .get(index)
        .copied()
        .ok_or_else(|| VmError::internal("missing argument"))?;
    value
        .as_fixnum()
        .ok_or_else(|| VmError::type_error("Integer", value, "no implicit conversion into Integer"))
}

fn fixnum_recv(args: &Arguments) -> VmResult<i64> {
    args.recv.as_fixnum().ok_or_else(|| {
        VmError::type_error("Integer", args.recv, "receiver is not an Integer")
    })
}

fn int_plus(_runtime: &mut Runtime, args: &Arguments) -> VmResult<Value> {
    Ok(Value::fixnum(fixnum_recv(args)?.wrapping_add(fixnum_arg(args, 0)?)))
}

fn int_times(_runtime: &mut Runtime, args: &Arguments) -> VmResult<Value> {
    Ok(Value::fixnum(fixnum_recv(args)?.wrapping_mul(fixnum_arg(args, 0)?)))
}

/// Render any value the way its `to_s` would.
fn render(runtime: &Runtime, value: Value) -> String {
    if value.is_nil() {
        String::new()
    } else if value.is_true() {
        "true".into()
    } else if value.is_false() {
        "false".into()
    } else if let Some(n) = value.as_fixnum() {
        n.to_string()
    } else if let Some(sym) = value.as_symbol() {
        sym.as_str().to_string()
    } else if let Some(text) = runtime.heap.string_at(value) {
        text.to_string()
    } else {
        let class = runtime.classes.name_of(runtime.class_of(value));
        format!("#<{class}>")
    }
}

fn object_to_s(runtime: &mut Runtime, args: &Arguments) -> VmResult<Value> {
    let text = render(runtime, args.recv);
    let class = runtime.classes.well_known().string;
    Ok(runtime.heap.alloc_string(class, text))
}

fn object_inspect(runtime: &mut Runtime, args: &Arguments) -> VmResult<Value> {
    let text = match runtime.heap.string_at(args.recv) {
        Some(inner) => format!("{inner:?}"),
        None if args.recv.is_nil() => "nil".into(),
        None => render(runtime, args.recv),
    };
    let class = runtime.classes.well_known().string;
    Ok(runtime.heap.alloc_string(class, text))
}

fn string_size(runtime: &mut Runtime, args: &Arguments) -> VmResult<Value> {
    match runtime.heap.string_at(args.recv) {
        Some(text) => Ok(Value::fixnum(text.chars().count() as i64)),
        None => Err(VmError::type_error(
            "String",
            args.recv,
            "receiver is not a String",
        )),
    }
}

/// Invoker behind `invoke_primitive fixnum_add`: sum of the popped operands.
fn prim_fixnum_add(_runtime: &mut Runtime, args: &Arguments) -> VmResult<Value> {
    let mut total = 0i64;
    for value in args.args.iter() {
        total = total.wrapping_add(value.as_fixnum().ok_or_else(|| {
            VmError::type_error("Integer", *value, "no implicit conversion into Integer")
        })?);
    }
    Ok(Value::fixnum(total))
}

/// Invoker behind `invoke_primitive object_render`.
fn prim_object_render(runtime: &mut Runtime, args: &Arguments) -> VmResult<Value> {
    let target = args.args.first().copied().unwrap_or(args.recv);
    let text = render(runtime, target);
    let class = runtime.classes.well_known().string;
    Ok(runtime.heap.alloc_string(class, text))
}
