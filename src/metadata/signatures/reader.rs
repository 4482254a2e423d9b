//! The recursive signature decoder.

use std::sync::Arc;

use crate::{
    file::parser::Parser,
    metadata::{
        signatures::{calling_convention as conv, element_type as et},
        token::Token,
        typesystem::{
            GenericContainerRef, MethodSig, ParamAttributes, ParamSig, Ty, TyRef, TypeHandle,
        },
    },
    Result,
};

/// Recursion bound for nested signature structures.
pub const MAX_SIGNATURE_DEPTH: usize = 50;

/// Bound on generic instantiation arity, from the original loader.
const MAX_GENERIC_ARGS: u32 = 100;

/// Resolves the cross-table references a signature can contain.
///
/// Implemented by the per-module projection: type tokens resolve against
/// the module's own tables, its references and the shared universe; the
/// instantiation hook goes to the universe interner so identical closings
/// share one handle.
pub trait TypeResolver {
    /// Resolve a `TypeDef`/`TypeRef`/`TypeSpec` token to a type.
    ///
    /// # Errors
    /// Resolution failures are fatal ([`crate::Error::ResolutionFailed`]
    /// or [`crate::Error::BadImage`]).
    fn resolve_type_token(
        &self,
        token: Token,
        class_ctx: Option<&GenericContainerRef>,
        method_ctx: Option<&GenericContainerRef>,
    ) -> Result<TyRef>;

    /// Intern a generic instantiation.
    ///
    /// # Errors
    /// Propagates interner failures.
    fn intern_instantiation(&self, def: TypeHandle, args: Vec<TyRef>) -> Result<TyRef>;
}

/// Decoder for one signature blob.
///
/// The reader borrows the enclosing type/method generic containers; when
/// one is absent (member references, where the eventual container is not
/// known yet) the matching variables decode to raw indices instead of
/// bound parameters.
pub struct SignatureReader<'a, 'r> {
    parser: Parser<'a>,
    resolver: &'r dyn TypeResolver,
    class_ctx: Option<&'r GenericContainerRef>,
    method_ctx: Option<&'r GenericContainerRef>,
    depth: usize,
}

impl<'a, 'r> SignatureReader<'a, 'r> {
    /// Create a reader over `data`.
    #[must_use]
    pub fn new(
        data: &'a [u8],
        resolver: &'r dyn TypeResolver,
        class_ctx: Option<&'r GenericContainerRef>,
        method_ctx: Option<&'r GenericContainerRef>,
    ) -> SignatureReader<'a, 'r> {
        SignatureReader {
            parser: Parser::new(data),
            resolver,
            class_ctx,
            method_ctx,
            depth: 0,
        }
    }

    /// Decode a single type, discarding modifier-derived attributes.
    ///
    /// # Errors
    /// Returns [`crate::Error::BadImage`] for unknown leading tags,
    /// [`crate::Error::NotSupported`] for recognized-but-unsupported
    /// shapes (function pointers) and [`crate::Error::LimitExceeded`]
    /// past the recursion bound.
    pub fn read_type(&mut self) -> Result<TyRef> {
        Ok(self.read_type_with_attrs()?.0)
    }

    /// Decode a single type plus the parameter attributes its custom
    /// modifiers contribute (`In`/`Out` marker modifiers).
    pub fn read_type_with_attrs(&mut self) -> Result<(TyRef, ParamAttributes)> {
        self.depth += 1;
        if self.depth >= MAX_SIGNATURE_DEPTH {
            return Err(crate::Error::LimitExceeded(format!(
                "Signature nesting deeper than {MAX_SIGNATURE_DEPTH}"
            )));
        }
        let result = self.read_type_inner();
        self.depth -= 1;
        result
    }

    #[allow(clippy::too_many_lines)]
    fn read_type_inner(&mut self) -> Result<(TyRef, ParamAttributes)> {
        let mut attrs = ParamAttributes::empty();
        loop {
            let tag = self.parser.read_le::<u8>()?;
            let ty = match tag {
                et::VOID => Ty::Void.shared(),
                et::BOOLEAN => Ty::Bool.shared(),
                et::CHAR => Ty::Char.shared(),
                et::I1 => Ty::I1.shared(),
                et::U1 => Ty::U1.shared(),
                et::I2 => Ty::I2.shared(),
                et::U2 => Ty::U2.shared(),
                et::I4 => Ty::I4.shared(),
                et::U4 => Ty::U4.shared(),
                et::I8 => Ty::I8.shared(),
                et::U8 => Ty::U8.shared(),
                et::R4 => Ty::R4.shared(),
                et::R8 => Ty::R8.shared(),
                et::STRING => Ty::String.shared(),
                et::OBJECT => Ty::Object.shared(),
                et::TYPEDBYREF => Ty::TypedByRef.shared(),
                et::I => Ty::I.shared(),
                et::U => Ty::U.shared(),
                et::SENTINEL => Ty::Sentinel.shared(),
                et::PTR => Arc::new(Ty::Ptr(self.read_type()?)),
                et::BYREF => Arc::new(Ty::ByRef(self.read_type()?)),
                et::SZARRAY => Arc::new(Ty::SzArray(self.read_type()?)),
                et::PINNED => Arc::new(Ty::Pinned(self.read_type()?)),
                et::VALUETYPE | et::CLASS => {
                    let token = self.parser.read_compressed_token()?;
                    self.resolver
                        .resolve_type_token(token, self.class_ctx, self.method_ctx)?
                }
                et::ARRAY => self.read_array_type()?,
                et::GENERICINST => self.read_generic_inst()?,
                et::VAR => {
                    let number = self.parser.read_compressed_u32()?;
                    match self.class_ctx {
                        Some(container) => Arc::new(Ty::Var(container.param(number)?)),
                        None => Arc::new(Ty::RawVar(number)),
                    }
                }
                et::MVAR => {
                    let number = self.parser.read_compressed_u32()?;
                    match self.method_ctx {
                        Some(container) => Arc::new(Ty::MVar(container.param(number)?)),
                        None => Arc::new(Ty::RawMVar(number)),
                    }
                }
                et::CMOD_REQD => {
                    // Two well-known modifier types mark parameter
                    // direction; every other modifier is informational.
                    let token = self.parser.read_compressed_token()?;
                    let modifier = self.resolver.resolve_type_token(token, None, None)?;
                    if let Some(handle) = modifier.type_handle() {
                        if handle.namespace() == "System.Runtime.InteropServices" {
                            match handle.name() {
                                "InAttribute" => attrs |= ParamAttributes::IN,
                                "OutAttribute" => attrs |= ParamAttributes::OUT,
                                _ => {}
                            }
                        }
                    }
                    continue;
                }
                et::CMOD_OPT => {
                    let _token = self.parser.read_compressed_token()?;
                    continue;
                }
                et::FNPTR => {
                    return Err(not_supported_error!("Function pointer signature"));
                }
                et::INTERNAL | et::MODIFIER => {
                    return Err(not_supported_error!("Signature element {:#04x}", tag));
                }
                other => {
                    return Err(bad_image_error!("Invalid signature element {:#04x}", other));
                }
            };
            return Ok((ty, attrs));
        }
    }

    fn read_array_type(&mut self) -> Result<TyRef> {
        let elem = self.read_type()?;
        let rank = self.parser.read_compressed_u32()?;
        if rank == 0 {
            return Err(bad_image_error!("Array with rank 0"));
        }

        let num_sizes = self.parser.read_compressed_u32()?;
        let mut sizes = Vec::with_capacity(num_sizes as usize);
        for _ in 0..num_sizes {
            sizes.push(self.parser.read_compressed_u32()?);
        }

        let num_lo_bounds = self.parser.read_compressed_u32()?;
        let mut lo_bounds = Vec::with_capacity(num_lo_bounds as usize);
        for _ in 0..num_lo_bounds {
            lo_bounds.push(self.parser.read_compressed_i32()?);
        }

        Ok(Arc::new(Ty::Array {
            elem,
            rank,
            sizes,
            lo_bounds,
        }))
    }

    fn read_generic_inst(&mut self) -> Result<TyRef> {
        let base = self.read_type()?;
        let def = match base.as_ref() {
            Ty::Class(handle) | Ty::ValueType(handle) => handle.clone(),
            other => {
                return Err(bad_image_error!(
                    "Generic instantiation over non-definition {}",
                    other
                ));
            }
        };

        let argc = self.parser.read_compressed_u32()?;
        if argc == 0 {
            return Err(bad_image_error!("Generic instantiation with 0 arguments"));
        }
        if argc > MAX_GENERIC_ARGS {
            return Err(crate::Error::LimitExceeded(format!(
                "Generic instantiation arity {argc} exceeds {MAX_GENERIC_ARGS}"
            )));
        }

        let mut args = Vec::with_capacity(argc as usize);
        for _ in 0..argc {
            args.push(self.read_type()?);
        }
        self.resolver.intern_instantiation(def, args)
    }

    /// Decode a field signature (leading `FIELD` convention byte).
    ///
    /// # Errors
    /// Returns [`crate::Error::BadImage`] for a non-field convention.
    pub fn read_field_sig(&mut self) -> Result<(TyRef, ParamAttributes)> {
        let convention = self.parser.read_le::<u8>()?;
        if convention & conv::MASK != conv::FIELD {
            return Err(bad_image_error!(
                "Field signature with convention {:#04x}",
                convention
            ));
        }
        self.read_type_with_attrs()
    }

    /// Decode a method-definition signature.
    ///
    /// `declared_generic_arity` is the container arity from the generic
    /// parameter tables; a mismatch with the signature's own count is a
    /// structural error.
    ///
    /// # Errors
    /// Returns [`crate::Error::BadImage`] on arity mismatch or malformed
    /// structure.
    pub fn read_method_def_sig(&mut self, declared_generic_arity: u32) -> Result<MethodSig> {
        let convention = self.parser.read_le::<u8>()?;

        let generic_param_count = if convention & conv::GENERIC != 0 {
            let count = self.parser.read_compressed_u32()?;
            if count != declared_generic_arity {
                return Err(bad_image_error!(
                    "Signature declares {} generic parameters, tables declare {}",
                    count,
                    declared_generic_arity
                ));
            }
            count
        } else {
            0
        };

        let param_count = self.parser.read_compressed_u32()?;
        let ret = self.read_type()?;

        let mut params = Vec::with_capacity(param_count as usize);
        for _ in 0..param_count {
            let (ty, attrs) = self.read_type_with_attrs()?;
            params.push(ParamSig {
                ty,
                attrs,
                name: None,
            });
        }

        Ok(MethodSig {
            has_this: convention & conv::HAS_THIS != 0,
            call_conv: convention,
            generic_param_count,
            ret,
            params,
        })
    }

    /// Decode a method-reference signature (member refs; tolerates the
    /// vararg sentinel by dropping the trailing portion).
    ///
    /// # Errors
    /// Returns format errors as for [`SignatureReader::read_method_def_sig`].
    pub fn read_method_ref_sig(&mut self) -> Result<MethodSig> {
        let convention = self.parser.read_le::<u8>()?;

        let generic_param_count = if convention & conv::GENERIC != 0 {
            self.parser.read_compressed_u32()?
        } else {
            0
        };

        let param_count = self.parser.read_compressed_u32()?;
        let ret = self.read_type()?;

        let mut params = Vec::with_capacity(param_count as usize);
        let mut saw_sentinel = false;
        for _ in 0..param_count {
            let (ty, attrs) = self.read_type_with_attrs()?;
            if matches!(ty.as_ref(), Ty::Sentinel) {
                if convention & conv::MASK != conv::VARARG {
                    return Err(bad_image_error!("Sentinel outside a vararg signature"));
                }
                saw_sentinel = true;
                continue;
            }
            if !saw_sentinel {
                params.push(ParamSig {
                    ty,
                    attrs,
                    name: None,
                });
            }
        }

        Ok(MethodSig {
            has_this: convention & conv::HAS_THIS != 0,
            call_conv: convention,
            generic_param_count,
            ret,
            params,
        })
    }

    /// Peek whether a member-reference signature denotes a field.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] on an empty blob.
    pub fn peek_is_field_sig(&self) -> Result<bool> {
        Ok(self.parser.peek_byte()? & conv::MASK == conv::FIELD)
    }

    /// Decode a local-variable signature into the locals' types.
    ///
    /// # Errors
    /// Returns [`crate::Error::BadImage`] for a non-locals convention or
    /// out-of-range count.
    pub fn read_local_var_sig(&mut self) -> Result<Vec<TyRef>> {
        let convention = self.parser.read_le::<u8>()?;
        if convention != conv::LOCAL_SIG {
            return Err(bad_image_error!(
                "Locals signature with convention {:#04x}",
                convention
            ));
        }

        let count = self.parser.read_compressed_u32()?;
        if count == 0 || count > 0xFFFE {
            return Err(bad_image_error!("Locals signature declares {} slots", count));
        }

        let mut locals = Vec::with_capacity(count as usize);
        for _ in 0..count {
            locals.push(self.read_type()?);
        }
        Ok(locals)
    }

    /// Decode a stand-alone method signature (`calli` operand).
    ///
    /// # Errors
    /// Returns format errors as for the other member signatures.
    pub fn read_stand_alone_method_sig(&mut self) -> Result<MethodSig> {
        self.read_method_ref_sig()
    }

    /// Decode a method-spec instantiation into its type arguments.
    ///
    /// # Errors
    /// Returns [`crate::Error::BadImage`] for a wrong convention byte and
    /// [`crate::Error::LimitExceeded`] past the arity bound.
    pub fn read_method_spec_sig(&mut self) -> Result<Vec<TyRef>> {
        let convention = self.parser.read_le::<u8>()?;
        if convention != conv::GENERIC_INST {
            return Err(bad_image_error!(
                "Method-spec signature with convention {:#04x}",
                convention
            ));
        }

        let argc = self.parser.read_compressed_u32()?;
        if argc > MAX_GENERIC_ARGS {
            return Err(crate::Error::LimitExceeded(format!(
                "Method instantiation arity {argc} exceeds {MAX_GENERIC_ARGS}"
            )));
        }

        let mut args = Vec::with_capacity(argc as usize);
        for _ in 0..argc {
            args.push(self.read_type()?);
        }
        Ok(args)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::typesystem::{ModuleId, TypeDef, TypeSource};

    /// A resolver that answers every token with one fixed handle.
    struct FixedResolver {
        handle: TypeHandle,
    }

    impl FixedResolver {
        fn new() -> FixedResolver {
            let handle: TypeHandle = Arc::new(TypeDef::shell(
                ModuleId::AOT,
                1,
                Token::new(0x0200_0001),
                TypeSource::Aot,
            ));
            let _ = handle.name.set("Fixed".to_string());
            let _ = handle.namespace.set("Test".to_string());
            let _ = handle.value_type.set(false);
            FixedResolver { handle }
        }
    }

    impl TypeResolver for FixedResolver {
        fn resolve_type_token(
            &self,
            _token: Token,
            _class_ctx: Option<&GenericContainerRef>,
            _method_ctx: Option<&GenericContainerRef>,
        ) -> Result<TyRef> {
            Ok(Arc::new(Ty::Class(self.handle.clone())))
        }

        fn intern_instantiation(&self, def: TypeHandle, args: Vec<TyRef>) -> Result<TyRef> {
            Ok(Arc::new(Ty::GenericInst { def, args }))
        }
    }

    #[test]
    fn decodes_primitive_method_sig() {
        // default, 2 params, ret void, (i4, string)
        let blob = [0x00, 0x02, 0x01, 0x08, 0x0E];
        let resolver = FixedResolver::new();
        let mut reader = SignatureReader::new(&blob, &resolver, None, None);
        let sig = reader.read_method_def_sig(0).unwrap();
        assert!(!sig.has_this);
        assert_eq!(sig.params.len(), 2);
        assert_eq!(sig.ret.as_ref(), &Ty::Void);
        assert_eq!(sig.params[0].ty.as_ref(), &Ty::I4);
        assert_eq!(sig.params[1].ty.as_ref(), &Ty::String);
    }

    #[test]
    fn decodes_array_with_bounds() {
        // i4[3...,0...] : ARRAY i4 rank=2 sizes=[] lobounds=[3, 0]
        let blob = [0x14, 0x08, 0x02, 0x00, 0x02, 0x06, 0x00];
        let resolver = FixedResolver::new();
        let mut reader = SignatureReader::new(&blob, &resolver, None, None);
        let ty = reader.read_type().unwrap();
        match ty.as_ref() {
            Ty::Array {
                rank, lo_bounds, ..
            } => {
                assert_eq!(*rank, 2);
                assert_eq!(lo_bounds, &[3, 0]);
            }
            other => panic!("expected array, got {other}"),
        }
    }

    #[test]
    fn unknown_tag_is_bad_image() {
        let blob = [0x3A];
        let resolver = FixedResolver::new();
        let mut reader = SignatureReader::new(&blob, &resolver, None, None);
        assert!(matches!(
            reader.read_type(),
            Err(crate::Error::BadImage { .. })
        ));
    }

    #[test]
    fn unbound_variables_decode_raw() {
        let blob = [0x13, 0x01];
        let resolver = FixedResolver::new();
        let mut reader = SignatureReader::new(&blob, &resolver, None, None);
        assert_eq!(reader.read_type().unwrap().as_ref(), &Ty::RawVar(1));
    }

    #[test]
    fn locals_signature_bounds() {
        let resolver = FixedResolver::new();
        let blob = [0x07, 0x01, 0x08];
        let mut reader = SignatureReader::new(&blob, &resolver, None, None);
        assert_eq!(reader.read_local_var_sig().unwrap().len(), 1);

        let blob = [0x07, 0x00];
        let mut reader = SignatureReader::new(&blob, &resolver, None, None);
        assert!(reader.read_local_var_sig().is_err());
    }

    #[test]
    fn recursion_limit_is_enforced() {
        // A long chain of SZARRAY wrappers.
        let mut blob = vec![0x1D; 64];
        blob.push(0x08);
        let resolver = FixedResolver::new();
        let mut reader = SignatureReader::new(&blob, &resolver, None, None);
        assert!(matches!(
            reader.read_type(),
            Err(crate::Error::LimitExceeded(_))
        ));
    }
}
