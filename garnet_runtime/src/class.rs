//! Classes, method tables, and the registry.
//!
//! Method dispatch cares about two things this module owns: the superclass
//! walk with visibility rules, and the per-class *method serial* — a
//! generation counter bumped on every method-table mutation. The serial is
//! packed next to the class id into [`ClassData`], the single-word receiver
//! descriptor inline caches compare on every send.

use crate::call::{Dispatch, MethodMissingReason};
use crate::executable::Executable;
use garnet_core::{Symbol, Value};
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use std::sync::Arc;

/// Index of a class in the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct ClassId(u32);

impl ClassId {
    #[inline(always)]
    pub const fn index(self) -> usize {
        self.0 as usize
    }

    #[inline(always)]
    pub const fn from_index(index: u32) -> ClassId {
        ClassId(index)
    }
}

/// Compact class identity: `(method serial << 32) | class id`, compared as
/// one machine word. A stale serial makes the word differ, so cache checks
/// get serial invalidation for free.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct ClassData(u64);

impl ClassData {
    #[inline(always)]
    pub const fn new(class: ClassId, serial: u32) -> ClassData {
        ClassData(((serial as u64) << 32) | class.0 as u64)
    }

    #[inline(always)]
    pub const fn class_id(self) -> ClassId {
        ClassId(self.0 as u32)
    }

    #[inline(always)]
    pub const fn serial(self) -> u32 {
        (self.0 >> 32) as u32
    }

    #[inline(always)]
    pub const fn raw(self) -> u64 {
        self.0
    }
}

/// Method visibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    Public,
    Private,
    Protected,
}

/// One method-table entry.
#[derive(Clone)]
pub struct MethodEntry {
    pub executable: Arc<Executable>,
    pub visibility: Visibility,
}

struct Class {
    name: Symbol,
    superclass: Option<ClassId>,
    methods: FxHashMap<Symbol, MethodEntry>,
    constants: FxHashMap<Symbol, Value>,
    /// Method generation; bumped on every table mutation.
    serial: u32,
}

/// Ids of the classes the core bootstraps.
#[derive(Debug, Clone, Copy)]
pub struct WellKnown {
    pub object: ClassId,
    pub integer: ClassId,
    pub symbol: ClassId,
    pub string: ClassId,
    pub array: ClassId,
    pub nil_class: ClassId,
    pub true_class: ClassId,
    pub false_class: ClassId,
    pub exception: ClassId,
    pub type_error: ClassId,
    pub no_method_error: ClassId,
    pub name_error: ClassId,
    pub interpreter_error: ClassId,
    pub compiled_code: ClassId,
    pub block_environment: ClassId,
    pub call_site: ClassId,
    pub constant_cache: ClassId,
    pub unwind_site: ClassId,
}

/// The class table.
pub struct ClassRegistry {
    classes: RwLock<Vec<Class>>,
    well_known: WellKnown,
}

/// How a lookup should treat visibility and search origin.
#[derive(Debug, Clone, Copy)]
pub struct LookupMode {
    pub allow_private: bool,
    pub is_super: bool,
    pub is_vcall: bool,
    /// Class of the caller's `self`, for protected checks.
    pub self_class: ClassId,
}

impl ClassRegistry {
    /// Create the registry with the bootstrap class hierarchy installed.
    pub fn bootstrap() -> ClassRegistry {
        let mut classes = Vec::new();
        let mut define = |name: &str, superclass: Option<ClassId>| {
            let id = ClassId(classes.len() as u32);
            classes.push(Class {
                name: Symbol::intern(name),
                superclass,
                methods: FxHashMap::default(),
                constants: FxHashMap::default(),
                serial: 0,
            });
            id
        };

        let object = define("Object", None);
        let integer = define("Integer", Some(object));
        let symbol = define("Symbol", Some(object));
        let string = define("String", Some(object));
        let array = define("Array", Some(object));
        let nil_class = define("NilClass", Some(object));
        let true_class = define("TrueClass", Some(object));
        let false_class = define("FalseClass", Some(object));
        let exception = define("Exception", Some(object));
        let type_error = define("TypeError", Some(exception));
        let no_method_error = define("NoMethodError", Some(exception));
        let name_error = define("NameError", Some(exception));
        let interpreter_error = define("InterpreterError", Some(exception));
        let compiled_code = define("CompiledCode", Some(object));
        let block_environment = define("BlockEnvironment", Some(object));
        let call_site = define("CallSite", Some(object));
        let constant_cache = define("ConstantCache", Some(object));
        let unwind_site = define("UnwindSite", Some(object));

        let well_known = WellKnown {
            object,
            integer,
            symbol,
            string,
            array,
            nil_class,
            true_class,
            false_class,
            exception,
            type_error,
            no_method_error,
            name_error,
            interpreter_error,
            compiled_code,
            block_environment,
            call_site,
            constant_cache,
            unwind_site,
        };

        ClassRegistry {
            classes: RwLock::new(classes),
            well_known,
        }
    }

    #[inline]
    pub fn well_known(&self) -> &WellKnown {
        &self.well_known
    }

    /// Define a new class under `superclass`.
    pub fn define_class(&self, name: &str, superclass: ClassId) -> ClassId {
        let mut classes = self.classes.write();
        let id = ClassId(classes.len() as u32);
        classes.push(Class {
            name: Symbol::intern(name),
            superclass: Some(superclass),
            methods: FxHashMap::default(),
            constants: FxHashMap::default(),
            serial: 0,
        });
        id
    }

    /// Install a method, bumping the class's method serial.
    pub fn define_method(
        &self,
        class: ClassId,
        name: Symbol,
        visibility: Visibility,
        executable: Arc<Executable>,
    ) {
        let mut classes = self.classes.write();
        let class = &mut classes[class.index()];
        class.methods.insert(
            name,
            MethodEntry {
                executable,
                visibility,
            },
        );
        class.serial = class.serial.wrapping_add(1);
    }

    /// Change a method's visibility, bumping the serial.
    pub fn set_visibility(&self, class: ClassId, name: Symbol, visibility: Visibility) -> bool {
        let mut classes = self.classes.write();
        let class = &mut classes[class.index()];
        match class.methods.get_mut(&name) {
            Some(entry) => {
                entry.visibility = visibility;
                class.serial = class.serial.wrapping_add(1);
                true
            }
            None => false,
        }
    }

    pub fn name_of(&self, class: ClassId) -> Symbol {
        self.classes.read()[class.index()].name
    }

    pub fn superclass_of(&self, class: ClassId) -> Option<ClassId> {
        self.classes.read()[class.index()].superclass
    }

    /// Current method generation of a class.
    pub fn serial_of(&self, class: ClassId) -> u32 {
        self.classes.read()[class.index()].serial
    }

    /// The single-word receiver descriptor for a class right now.
    pub fn class_data(&self, class: ClassId) -> ClassData {
        ClassData::new(class, self.serial_of(class))
    }

    /// True if `class` is `ancestor` or inherits from it.
    pub fn is_kind_of(&self, class: ClassId, ancestor: ClassId) -> bool {
        let classes = self.classes.read();
        let mut current = Some(class);
        while let Some(id) = current {
            if id == ancestor {
                return true;
            }
            current = classes[id.index()].superclass;
        }
        false
    }

    // =========================================================================
    // Constants
    // =========================================================================

    pub fn constant_get(&self, class: ClassId, name: Symbol) -> Option<Value> {
        let classes = self.classes.read();
        let mut current = Some(class);
        while let Some(id) = current {
            if let Some(value) = classes[id.index()].constants.get(&name) {
                return Some(*value);
            }
            current = classes[id.index()].superclass;
        }
        None
    }

    pub fn constant_set(&self, class: ClassId, name: Symbol, value: Value) {
        self.classes.write()[class.index()]
            .constants
            .insert(name, value);
    }

    // =========================================================================
    // Method lookup
    // =========================================================================

    /// Full method resolution: walk the superclass chain honoring visibility,
    /// producing the `Dispatch` record inline caches memoize.
    ///
    /// Super sends start the walk above the receiver's own class. A method
    /// found but blocked by visibility yields a method-missing reason rather
    /// than the method.
    pub fn lookup_method(&self, class: ClassId, name: Symbol, mode: LookupMode) -> Dispatch {
        let classes = self.classes.read();

        let start = if mode.is_super {
            classes[class.index()].superclass
        } else {
            Some(class)
        };

        let mut current = start;
        while let Some(id) = current {
            if let Some(entry) = classes[id.index()].methods.get(&name) {
                let blocked = match entry.visibility {
                    Visibility::Public => None,
                    Visibility::Private if mode.allow_private => None,
                    Visibility::Private => Some(MethodMissingReason::Private),
                    Visibility::Protected => {
                        if self.is_kind_of_locked(&classes, mode.self_class, id) {
                            None
                        } else {
                            Some(MethodMissingReason::Protected)
                        }
                    }
                };
                return match blocked {
                    None => Dispatch {
                        module: id,
                        method: Some(entry.executable.clone()),
                        method_missing: MethodMissingReason::None,
                    },
                    Some(reason) => Dispatch {
                        module: id,
                        method: None,
                        method_missing: reason,
                    },
                };
            }
            current = classes[id.index()].superclass;
        }

        let reason = if mode.is_vcall {
            MethodMissingReason::Vcall
        } else if mode.is_super {
            MethodMissingReason::Super
        } else {
            MethodMissingReason::Normal
        };
        Dispatch {
            module: class,
            method: None,
            method_missing: reason,
        }
    }

    fn is_kind_of_locked(&self, classes: &[Class], class: ClassId, ancestor: ClassId) -> bool {
        let mut current = Some(class);
        while let Some(id) = current {
            if id == ancestor {
                return true;
            }
            current = classes[id.index()].superclass;
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executable::Executable;

    fn noop_primitive(
        _runtime: &mut crate::Runtime,
        _args: &crate::call::Arguments,
    ) -> garnet_core::VmResult<Value> {
        Ok(Value::nil())
    }

    fn entry() -> Arc<Executable> {
        Arc::new(Executable::Primitive {
            name: Symbol::intern("noop"),
            func: noop_primitive,
        })
    }

    fn mode(registry: &ClassRegistry) -> LookupMode {
        LookupMode {
            allow_private: false,
            is_super: false,
            is_vcall: false,
            self_class: registry.well_known().object,
        }
    }

    #[test]
    fn test_serial_bumps_on_define() {
        let registry = ClassRegistry::bootstrap();
        let class = registry.well_known().integer;
        let before = registry.serial_of(class);
        registry.define_method(class, Symbol::intern("plus"), Visibility::Public, entry());
        assert_eq!(registry.serial_of(class), before + 1);
    }

    #[test]
    fn test_class_data_packs_id_and_serial() {
        let registry = ClassRegistry::bootstrap();
        let class = registry.well_known().string;
        let before = registry.class_data(class);
        registry.define_method(class, Symbol::intern("size"), Visibility::Public, entry());
        let after = registry.class_data(class);
        assert_eq!(before.class_id(), after.class_id());
        assert_ne!(before.raw(), after.raw());
    }

    #[test]
    fn test_lookup_walks_superclass() {
        let registry = ClassRegistry::bootstrap();
        let object = registry.well_known().object;
        let name = Symbol::intern("inspect");
        registry.define_method(object, name, Visibility::Public, entry());

        let dispatch = registry.lookup_method(registry.well_known().array, name, mode(&registry));
        assert_eq!(dispatch.module, object);
        assert!(dispatch.method.is_some());
        assert_eq!(dispatch.method_missing, MethodMissingReason::None);
    }

    #[test]
    fn test_private_blocks_without_allow() {
        let registry = ClassRegistry::bootstrap();
        let class = registry.define_class("Widget", registry.well_known().object);
        let name = Symbol::intern("secret");
        registry.define_method(class, name, Visibility::Private, entry());

        let blocked = registry.lookup_method(class, name, mode(&registry));
        assert_eq!(blocked.method_missing, MethodMissingReason::Private);
        assert!(blocked.method.is_none());

        let allowed = registry.lookup_method(
            class,
            name,
            LookupMode {
                allow_private: true,
                ..mode(&registry)
            },
        );
        assert!(allowed.method.is_some());
    }

    #[test]
    fn test_missing_reasons() {
        let registry = ClassRegistry::bootstrap();
        let class = registry.well_known().integer;
        let name = Symbol::intern("definitely_absent");

        let normal = registry.lookup_method(class, name, mode(&registry));
        assert_eq!(normal.method_missing, MethodMissingReason::Normal);

        let vcall = registry.lookup_method(
            class,
            name,
            LookupMode {
                is_vcall: true,
                ..mode(&registry)
            },
        );
        assert_eq!(vcall.method_missing, MethodMissingReason::Vcall);

        let sup = registry.lookup_method(
            class,
            name,
            LookupMode {
                is_super: true,
                ..mode(&registry)
            },
        );
        assert_eq!(sup.method_missing, MethodMissingReason::Super);
    }

    #[test]
    fn test_super_skips_own_class() {
        let registry = ClassRegistry::bootstrap();
        let parent = registry.define_class("Parent", registry.well_known().object);
        let child = registry.define_class("Child", parent);
        let name = Symbol::intern("greet");
        registry.define_method(parent, name, Visibility::Public, entry());
        registry.define_method(child, name, Visibility::Public, entry());

        let dispatch = registry.lookup_method(
            child,
            name,
            LookupMode {
                is_super: true,
                ..mode(&registry)
            },
        );
        assert_eq!(dispatch.module, parent);
    }
}
