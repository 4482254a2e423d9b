//! The process-wide type universe and the AOT registration surface.
//!
//! The host binary registers its precompiled assemblies once at startup
//! through [`UniverseBuilder`]; interpreter modules register themselves as
//! they load. Afterwards the universe answers the two questions the
//! resolution layer asks: "which assembly is this, by name" and "which
//! type is this, by namespace + name" - with failure always fatal to the
//! triggering operation, never partial.
//!
//! The universe also owns the instantiation interner: any two requests to
//! close a generic definition over identical arguments observe the same
//! shared handle, which downstream caches (vtables, IR descriptors) rely
//! on for identity-based keys.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use dashmap::DashMap;

use crate::metadata::cache::MemoMap;
use crate::metadata::token::Token;
use crate::metadata::typesystem::{
    defs::byval_of, GenericContainer, GenericContainerRef, GenericOwner, GenericParam, MethodDef,
    MethodAttributes, MethodHandle, MethodSig, Ty, TyRef, TypeAttributes, TypeDef, TypeHandle,
    TypeSource,
};
use crate::Result;

/// Identifies a loaded module; the AOT host is module 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ModuleId(pub u32);

impl ModuleId {
    /// The AOT host binary.
    pub const AOT: ModuleId = ModuleId(0);
}

/// Types of one registered assembly, keyed by `(namespace, name)`.
struct AssemblyTypes {
    types: DashMap<(String, String), TypeHandle>,
}

/// The shared AOT + interpreted type universe.
pub struct TypeUniverse {
    assemblies: DashMap<String, Arc<AssemblyTypes>>,
    /// Append-only registration log, in load order; modules register
    /// concurrently
    type_log: boxcar::Vec<TypeHandle>,
    instantiations: MemoMap<TyRef, TyRef>,
    next_module: AtomicU32,
}

impl TypeUniverse {
    /// Start building a universe by registering AOT content.
    #[must_use]
    pub fn builder() -> UniverseBuilder {
        UniverseBuilder {
            universe: TypeUniverse {
                assemblies: DashMap::new(),
                type_log: boxcar::Vec::new(),
                instantiations: MemoMap::new(),
                next_module: AtomicU32::new(1),
            },
        }
    }

    /// Allocate the id for a newly loading interpreter module.
    #[must_use]
    pub fn allocate_module_id(&self) -> ModuleId {
        ModuleId(self.next_module.fetch_add(1, Ordering::SeqCst))
    }

    /// Register an assembly name so its types become resolvable.
    ///
    /// Idempotent: re-registering an existing name returns the existing
    /// registry.
    pub fn register_assembly(&self, name: &str) {
        self.assemblies
            .entry(name.to_string())
            .or_insert_with(|| {
                Arc::new(AssemblyTypes {
                    types: DashMap::new(),
                })
            });
    }

    /// Register a type under its assembly.
    ///
    /// # Errors
    /// Returns [`crate::Error::ResolutionFailed`] if the assembly was
    /// never registered.
    pub fn register_type(&self, assembly: &str, handle: TypeHandle) -> Result<()> {
        let Some(registry) = self.assemblies.get(assembly) else {
            return Err(resolution_error!(
                "Assembly '{}' not registered while adding {}",
                assembly,
                handle.full_name()
            ));
        };
        registry.types.insert(
            (handle.namespace().to_string(), handle.name().to_string()),
            handle.clone(),
        );
        self.type_log.push(handle);
        Ok(())
    }

    /// Iterate every registered type, in registration order.
    pub fn types(&self) -> impl Iterator<Item = &TypeHandle> {
        self.type_log.iter().map(|(_, handle)| handle)
    }

    /// Returns `true` if `assembly` is registered.
    #[must_use]
    pub fn has_assembly(&self, assembly: &str) -> bool {
        self.assemblies.contains_key(assembly)
    }

    /// Look up a type by assembly, namespace and name.
    ///
    /// # Errors
    /// Returns [`crate::Error::ResolutionFailed`] for an unknown assembly
    /// or type; resolution failures are fatal, never degraded.
    pub fn lookup_type(&self, assembly: &str, namespace: &str, name: &str) -> Result<TypeHandle> {
        let Some(registry) = self.assemblies.get(assembly) else {
            return Err(resolution_error!("Assembly '{}' not loaded", assembly));
        };
        registry
            .types
            .get(&(namespace.to_string(), name.to_string()))
            .map(|entry| entry.value().clone())
            .ok_or_else(|| {
                resolution_error!(
                    "Type {}.{} not found in assembly '{}'",
                    namespace,
                    name,
                    assembly
                )
            })
    }

    /// Search every registered assembly for a type (used for well-known
    /// marker types whose home assembly name differs between profiles).
    ///
    /// # Errors
    /// Returns [`crate::Error::ResolutionFailed`] if no assembly defines
    /// the type.
    pub fn find_type(&self, namespace: &str, name: &str) -> Result<TypeHandle> {
        for entry in &self.assemblies {
            if let Some(handle) = entry
                .value()
                .types
                .get(&(namespace.to_string(), name.to_string()))
            {
                return Ok(handle.value().clone());
            }
        }
        Err(resolution_error!("Type {}.{} not found", namespace, name))
    }

    /// Intern a generic instantiation: identical `(definition, args)`
    /// always yields the same shared handle.
    ///
    /// # Errors
    /// Propagated from the memo primitive (infallible computation here).
    pub fn intern_instantiation(&self, def: TypeHandle, args: Vec<TyRef>) -> Result<TyRef> {
        let candidate: TyRef = Arc::new(Ty::GenericInst { def, args });
        self.instantiations
            .get_or_try_insert(candidate.clone(), || Ok(candidate))
    }

    /// Number of interned instantiations (monotonic; nothing is evicted).
    #[must_use]
    pub fn instantiation_count(&self) -> usize {
        self.instantiations.len()
    }
}

/// Declares one method of an AOT-registered type.
pub struct AotMethodSpec {
    /// Method name
    pub name: String,
    /// Attribute flags
    pub flags: MethodAttributes,
    /// Resolved signature
    pub sig: MethodSig,
    /// Precomputed vtable slot for virtual methods
    pub slot: Option<u16>,
}

/// Declares one AOT-registered type.
pub struct AotTypeSpec {
    /// Namespace
    pub namespace: String,
    /// Simple name
    pub name: String,
    /// Attribute flags
    pub flags: TypeAttributes,
    /// Whether the type is a value type
    pub value_type: bool,
    /// Resolved base type
    pub parent: Option<TyRef>,
    /// Precomputed value size (value types)
    pub value_size: Option<u32>,
    /// Precomputed total vtable slot count
    pub slot_count: u16,
    /// Methods, with virtual ones carrying their fixed slots
    pub methods: Vec<AotMethodSpec>,
    /// Implemented interfaces with their precomputed offset ranges
    pub interface_offsets: Vec<(TyRef, u32)>,
    /// Names of generic parameters, for open generic AOT definitions
    pub generic_params: Vec<String>,
}

impl AotTypeSpec {
    /// A plain reference type with no members.
    #[must_use]
    pub fn class(namespace: &str, name: &str) -> AotTypeSpec {
        AotTypeSpec {
            namespace: namespace.to_string(),
            name: name.to_string(),
            flags: TypeAttributes::empty(),
            value_type: false,
            parent: None,
            value_size: None,
            slot_count: 0,
            methods: Vec::new(),
            interface_offsets: Vec::new(),
            generic_params: Vec::new(),
        }
    }
}

/// Registers the host binary's precompiled content.
pub struct UniverseBuilder {
    universe: TypeUniverse,
}

impl UniverseBuilder {
    /// Register an assembly name.
    #[must_use]
    pub fn assembly(self, name: &str) -> UniverseBuilder {
        self.universe.register_assembly(name);
        self
    }

    /// Register one AOT type and return its handle for wiring further
    /// specs (parents, interfaces, signatures).
    ///
    /// # Errors
    /// Returns [`crate::Error::ResolutionFailed`] for an unregistered
    /// assembly and [`crate::Error::BadImage`] for an inconsistent vtable
    /// spec (slot outside `slot_count`).
    pub fn add_type(&self, assembly: &str, spec: AotTypeSpec) -> Result<TypeHandle> {
        static NEXT_AOT_INDEX: AtomicU32 = AtomicU32::new(1);
        let index = NEXT_AOT_INDEX.fetch_add(1, Ordering::SeqCst);

        let handle: TypeHandle = Arc::new(TypeDef::shell(
            ModuleId::AOT,
            index,
            Token::from_parts(0x02, index),
            TypeSource::Aot,
        ));

        let _ = handle.name.set(spec.name);
        let _ = handle.namespace.set(spec.namespace);
        let _ = handle.flags.set(spec.flags);
        let _ = handle.value_type.set(spec.value_type);
        let _ = handle.enum_type.set(false);
        let _ = handle.byval.set(byval_of(&handle));
        let _ = handle.parent.set(spec.parent);
        let _ = handle.fields.set(Vec::new());
        if let Some(size) = spec.value_size {
            let _ = handle.aot_value_size.set(size);
        }

        if !spec.generic_params.is_empty() {
            let params = spec
                .generic_params
                .iter()
                .enumerate()
                .map(|(number, name)| {
                    Arc::new(GenericParam {
                        number: u16::try_from(number).unwrap_or(u16::MAX),
                        flags: 0,
                        name: name.clone(),
                        is_method: false,
                        constraints: std::sync::OnceLock::new(),
                    })
                })
                .collect();
            let container: GenericContainerRef = Arc::new(GenericContainer {
                owner: GenericOwner::Type(handle.clone()),
                is_method: false,
                params,
            });
            let _ = handle.generic_container.set(container);
        }

        let mut methods: Vec<MethodHandle> = Vec::with_capacity(spec.methods.len());
        let mut vtable: Vec<Option<MethodHandle>> = vec![None; usize::from(spec.slot_count)];
        for (position, method_spec) in spec.methods.into_iter().enumerate() {
            let method: MethodHandle = Arc::new(MethodDef::shell(Token::from_parts(
                0x06,
                (index << 8) | u32::try_from(position).unwrap_or(0),
            )));
            let _ = method.name.set(method_spec.name);
            let _ = method.flags.set(method_spec.flags);
            let _ = method.declaring.set(handle.clone());
            let _ = method.signature.set(method_spec.sig);
            let _ = method.body.set(None);

            if let Some(slot) = method_spec.slot {
                let Some(entry) = vtable.get_mut(usize::from(slot)) else {
                    return Err(bad_image_error!(
                        "AOT slot {} outside declared slot count {}",
                        slot,
                        spec.slot_count
                    ));
                };
                *entry = Some(method.clone());
                let _ = method.slot.set(slot);
            }
            methods.push(method);
        }
        let _ = handle.methods.set(methods);
        let _ = handle
            .interfaces
            .set(spec.interface_offsets.iter().map(|(ty, _)| ty.clone()).collect());
        let _ = handle.aot_vtable.set(vtable);
        let _ = handle.aot_interface_offsets.set(spec.interface_offsets);

        self.universe.register_type(assembly, handle.clone())?;
        Ok(handle)
    }

    /// Finish registration.
    #[must_use]
    pub fn finish(self) -> Arc<TypeUniverse> {
        Arc::new(self.universe)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interned_instantiations_are_identical() {
        let builder = TypeUniverse::builder().assembly("mscorlib");
        let list = builder
            .add_type(
                "mscorlib",
                AotTypeSpec {
                    generic_params: vec!["T".to_string()],
                    ..AotTypeSpec::class("System.Collections.Generic", "List`1")
                },
            )
            .unwrap();
        let universe = builder.finish();

        let first = universe
            .intern_instantiation(list.clone(), vec![Ty::I4.shared()])
            .unwrap();
        let second = universe
            .intern_instantiation(list.clone(), vec![Ty::I4.shared()])
            .unwrap();
        assert!(Arc::ptr_eq(&first, &second));

        let other = universe
            .intern_instantiation(list, vec![Ty::I8.shared()])
            .unwrap();
        assert!(!Arc::ptr_eq(&first, &other));
        assert_eq!(universe.instantiation_count(), 2);
    }

    #[test]
    fn lookup_failures_are_fatal_errors() {
        let universe = TypeUniverse::builder().assembly("mscorlib").finish();
        assert!(universe.lookup_type("missing", "System", "Object").is_err());
        assert!(universe.lookup_type("mscorlib", "System", "Object").is_err());
    }
}
