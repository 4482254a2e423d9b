//! Per-module metadata projection: from raw tables to the handle model.
//!
//! [`InterpModule::load_from_bytes`] runs the whole pipeline: raw image
//! validation, shell creation, the fixed-order projection passes (see
//! [`project`]), registration into the shared universe, and the two vtable
//! phases. After `load` returns the module is immutable; every later
//! operation (token resolution, custom-attribute materialisation, method
//! transformation) only fills memo caches.
//!
//! Any unresolvable cross-module reference is fatal to the load. There is
//! no partial module.

mod attrs;
mod project;
mod resolve;

use std::path::Path;
use std::sync::{Arc, OnceLock};

use ouroboros::self_referencing;

use crate::{
    file::File,
    metadata::{
        cache::MemoMap,
        image::RawImage,
        tables::{rows::AssemblyRow, TableId},
        token::Token,
        typesystem::{
            ConstantValue, FieldHandle, GenericContainerRef, GenericContext, GenericParamRef,
            MethodHandle, ModuleId, TyRef, TypeHandle, TypeUniverse,
        },
        vtable::VTableResolver,
    },
    Result,
};

pub use attrs::{AttrArg, CustomAttribute, NamedAttrArg};
pub use resolve::ResolvedMethod;

/// Identity of the loaded assembly, from its manifest row.
#[derive(Debug, Clone)]
pub struct AssemblyIdentity {
    /// Simple name
    pub name: String,
    /// Version quadruple
    pub version: (u16, u16, u16, u16),
    /// Culture ("" for neutral)
    pub culture: String,
    /// Full public key, when the assembly is signed
    pub public_key: Vec<u8>,
    /// Public-key token: the trailing 8 bytes of the key's SHA-1, reversed
    pub public_key_token: Option<[u8; 8]>,
}

impl AssemblyIdentity {
    fn from_row(row: &AssemblyRow, image: &RawImage<'_>) -> Result<AssemblyIdentity> {
        let public_key = image.blob(row.public_key)?.to_vec();
        let public_key_token = if public_key.is_empty() {
            None
        } else {
            use sha1::{Digest, Sha1};
            let digest = Sha1::digest(&public_key);
            let mut token = [0u8; 8];
            for (position, byte) in digest[digest.len() - 8..].iter().rev().enumerate() {
                token[position] = *byte;
            }
            Some(token)
        };

        Ok(AssemblyIdentity {
            name: image.string(row.name)?.to_string(),
            version: (
                row.major_version,
                row.minor_version,
                row.build_number,
                row.revision_number,
            ),
            culture: image.string(row.culture)?.to_string(),
            public_key,
            public_key_token,
        })
    }
}

/// A property projected from the metadata, with its accessors bound.
pub struct PropertyDef {
    /// Declaring type
    pub parent: TypeHandle,
    /// Property name
    pub name: String,
    /// Property attribute flags
    pub flags: u16,
    /// Bound getter
    pub getter: Option<MethodHandle>,
    /// Bound setter
    pub setter: Option<MethodHandle>,
}

/// An event projected from the metadata, with its accessors bound.
pub struct EventDef {
    /// Declaring type
    pub parent: TypeHandle,
    /// Event name
    pub name: String,
    /// Event attribute flags
    pub flags: u16,
    /// Delegate type
    pub event_ty: TyRef,
    /// Bound add accessor
    pub add: Option<MethodHandle>,
    /// Bound remove accessor
    pub remove: Option<MethodHandle>,
    /// Bound raise accessor
    pub raise: Option<MethodHandle>,
}

/// One raw custom-attribute application.
pub(crate) struct AttrEntry {
    /// Constructor token (`MethodDef` or `MemberRef`)
    pub ctor_token: Token,
    /// `#Blob` offset of the encoded arguments (0 = default ctor)
    pub value: u32,
}

/// A contiguous run of attribute applications sharing one parent.
pub(crate) struct AttrRange {
    /// The attributed entity
    pub parent: Token,
    /// First entry index
    pub start: u32,
    /// Entry count
    pub count: u32,
}

#[self_referencing]
struct ImageHolder {
    file: File,
    #[borrows(file)]
    #[covariant]
    image: RawImage<'this>,
}

/// One loaded interpreter module and its projected metadata.
pub struct InterpModule {
    pub(crate) id: ModuleId,
    pub(crate) universe: Arc<TypeUniverse>,
    holder: ImageHolder,

    /// Module name from the Module table
    pub(crate) name: OnceLock<String>,
    /// Assembly identity from the manifest
    pub(crate) assembly: OnceLock<AssemblyIdentity>,

    /// TypeDef arena, in row order
    pub(crate) types: Vec<TypeHandle>,
    /// MethodDef arena, in row order
    pub(crate) methods: Vec<MethodHandle>,
    /// Field arena, in row order
    pub(crate) fields: Vec<FieldHandle>,
    /// GenericParam arena, in row order
    pub(crate) generic_params: OnceLock<Vec<GenericParamRef>>,

    /// Projected properties with bound accessors
    pub(crate) properties: OnceLock<Vec<PropertyDef>>,
    /// Projected events with bound accessors
    pub(crate) events: OnceLock<Vec<EventDef>>,
    /// Parameter default values keyed by Param-row token
    pub(crate) param_defaults: OnceLock<Vec<(Token, ConstantValue)>>,

    /// Raw custom-attribute entries, in table order
    pub(crate) attr_entries: OnceLock<Vec<AttrEntry>>,
    /// Contiguous attribute ranges keyed by parent token order
    pub(crate) attr_ranges: OnceLock<Vec<AttrRange>>,
    /// Lazily decoded attribute instances per range
    pub(crate) attr_cache: MemoMap<u32, Arc<Vec<CustomAttribute>>>,

    /// `(token, generic context)` resolution caches
    pub(crate) token_types: MemoMap<(Token, GenericContext), TyRef>,
    pub(crate) token_methods: MemoMap<(Token, GenericContext), ResolvedMethod>,
    pub(crate) token_fields: MemoMap<(Token, GenericContext), (TyRef, FieldHandle)>,
    /// Interned user-string literals
    pub(crate) user_strings: MemoMap<u32, Arc<String>>,

    /// Vtable construction state shared across this module's types
    pub(crate) vtables: VTableResolver,
}

impl InterpModule {
    /// Load a module from an owned byte buffer.
    ///
    /// # Errors
    /// Returns [`crate::Error::BadImage`]/[`crate::Error::NotSupported`]
    /// for format violations and [`crate::Error::ResolutionFailed`] for
    /// unresolvable references. There is no partial load: a failed load
    /// yields no module handle.
    pub fn load_from_bytes(universe: &Arc<TypeUniverse>, bytes: Vec<u8>) -> Result<Arc<InterpModule>> {
        Self::load(universe, File::from_mem(bytes)?)
    }

    /// Load a module from a file on disk (memory-mapped).
    ///
    /// # Errors
    /// As [`InterpModule::load_from_bytes`], plus I/O failures.
    pub fn load_from_file(universe: &Arc<TypeUniverse>, path: &Path) -> Result<Arc<InterpModule>> {
        Self::load(universe, File::from_file(path)?)
    }

    fn load(universe: &Arc<TypeUniverse>, file: File) -> Result<Arc<InterpModule>> {
        let holder = ImageHolder::try_new(file, |file| RawImage::load(file.data()))?;
        let id = universe.allocate_module_id();

        let module = Arc::new(Self::with_shells(id, universe.clone(), holder)?);
        module.project()?;
        Ok(module)
    }

    /// Create the module with its definition shells; everything else is
    /// filled by the projection passes.
    fn with_shells(
        id: ModuleId,
        universe: Arc<TypeUniverse>,
        holder: ImageHolder,
    ) -> Result<InterpModule> {
        let (types, methods, fields) = {
            let image = holder.borrow_image();
            project::create_shells(id, image)?
        };

        Ok(InterpModule {
            id,
            universe,
            holder,
            name: OnceLock::new(),
            assembly: OnceLock::new(),
            types,
            methods,
            fields,
            generic_params: OnceLock::new(),
            properties: OnceLock::new(),
            events: OnceLock::new(),
            param_defaults: OnceLock::new(),
            attr_entries: OnceLock::new(),
            attr_ranges: OnceLock::new(),
            attr_cache: MemoMap::new(),
            token_types: MemoMap::new(),
            token_methods: MemoMap::new(),
            token_fields: MemoMap::new(),
            user_strings: MemoMap::new(),
            vtables: VTableResolver::new(),
        })
    }

    /// The raw image backing this module.
    #[must_use]
    pub(crate) fn image(&self) -> &RawImage<'_> {
        self.holder.borrow_image()
    }

    /// This module's id within the universe.
    #[must_use]
    pub fn id(&self) -> ModuleId {
        self.id
    }

    /// The module name from its Module row.
    #[must_use]
    pub fn name(&self) -> &str {
        self.name.get().map_or("", String::as_str)
    }

    /// The assembly identity, when the module carries a manifest.
    #[must_use]
    pub fn assembly(&self) -> Option<&AssemblyIdentity> {
        self.assembly.get()
    }

    /// All type definitions, in row order.
    #[must_use]
    pub fn types(&self) -> &[TypeHandle] {
        &self.types
    }

    /// All method definitions, in row order.
    #[must_use]
    pub fn methods(&self) -> &[MethodHandle] {
        &self.methods
    }

    /// All field definitions, in row order.
    #[must_use]
    pub fn fields(&self) -> &[FieldHandle] {
        &self.fields
    }

    /// Projected properties.
    #[must_use]
    pub fn properties(&self) -> &[PropertyDef] {
        self.properties.get().map_or(&[], Vec::as_slice)
    }

    /// Projected events.
    #[must_use]
    pub fn events(&self) -> &[EventDef] {
        self.events.get().map_or(&[], Vec::as_slice)
    }

    /// Look up a type definition by namespace and name.
    #[must_use]
    pub fn type_by_name(&self, namespace: &str, name: &str) -> Option<TypeHandle> {
        self.types
            .iter()
            .find(|handle| handle.namespace() == namespace && handle.name() == name)
            .cloned()
    }

    /// The managed entry point, when the image declares one.
    #[must_use]
    pub fn entry_point(&self) -> Option<MethodHandle> {
        let token = self.image().entry_point_token()?;
        if token.table() != TableId::MethodDef as u8 || token.row() == 0 {
            return None;
        }
        self.methods.get(token.row() as usize - 1).cloned()
    }

    /// The interned user string at heap offset `index`.
    ///
    /// # Errors
    /// Propagates heap lookup failures.
    pub fn user_string(&self, index: u32) -> Result<Arc<String>> {
        self.user_strings.get_or_try_insert(index, || {
            Ok(Arc::new(self.image().user_strings().get_string(index)?))
        })
    }

    /// The decoded custom attributes applied to `parent`.
    ///
    /// Materialisation is lazy and cached per contiguous range.
    ///
    /// # Errors
    /// Propagates constructor resolution and blob decoding failures.
    pub fn custom_attributes(&self, parent: Token) -> Result<Arc<Vec<CustomAttribute>>> {
        attrs::attributes_for(self, parent)
    }

    /// Resolve the vtable of a concrete type through this module's
    /// resolver.
    ///
    /// # Errors
    /// Propagates vtable construction failures.
    pub fn vtable_of(&self, ty: &TyRef) -> Result<Arc<crate::metadata::vtable::VTable>> {
        self.vtables.resolve(ty)
    }

    /// Build (or fetch) the IR descriptor of one of this module's
    /// methods.
    ///
    /// Safe to call concurrently for the same method: the first published
    /// descriptor wins and both callers observe it.
    ///
    /// # Errors
    /// Propagates bytecode transformation failures; a method without a
    /// body is a [`crate::Error::BadImage`].
    pub fn method_ir(
        &self,
        method: &MethodHandle,
    ) -> Result<Arc<crate::interp::InterpMethodInfo>> {
        method
            .ir
            .get_or_try_init(|| {
                crate::interp::transform::transform(self, method).map(Arc::new)
            })
            .cloned()
    }

    /// The generic container of a method's declaring type, if any.
    #[must_use]
    pub(crate) fn class_container_of(method: &MethodHandle) -> Option<GenericContainerRef> {
        method
            .declaring
            .get()
            .and_then(|declaring| declaring.generic_container.get().cloned())
    }
}

impl std::fmt::Debug for InterpModule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "InterpModule({}, {} types, {} methods)",
            self.name(),
            self.types.len(),
            self.methods.len()
        )
    }
}
