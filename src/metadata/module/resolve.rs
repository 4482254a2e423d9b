//! Token resolution against the module's tables and the shared universe.
//!
//! Every resolver here is backed by the module's `(token, generic
//! context)` memo caches: a key resolves to the same handle for the
//! process lifetime, and failures abort the triggering operation rather
//! than caching a tombstone.

use std::sync::Arc;

use crate::{
    metadata::{
        module::InterpModule,
        signatures::{SignatureReader, TypeResolver},
        tables::{rows::*, CodedIndex, TableId},
        token::Token,
        typesystem::{
            inflate, inflate_args, FieldHandle, GenericContainerRef, GenericContext, MethodHandle,
            MethodSig, Ty, TyRef, TypeHandle,
        },
    },
    Result,
};

/// A resolved method reference: the target method, the concrete type it
/// was resolved against, and any method instantiation arguments.
#[derive(Clone)]
pub struct ResolvedMethod {
    /// The (possibly inflated) type the reference resolved through
    pub container: TyRef,
    /// The target method definition
    pub method: MethodHandle,
    /// Method generic arguments for `MethodSpec` references
    pub instantiation: Option<Arc<Vec<TyRef>>>,
}

impl TypeResolver for InterpModule {
    fn resolve_type_token(
        &self,
        token: Token,
        class_ctx: Option<&GenericContainerRef>,
        method_ctx: Option<&GenericContainerRef>,
    ) -> Result<TyRef> {
        self.resolve_type_token_impl(token, class_ctx, method_ctx)
    }

    fn intern_instantiation(&self, def: TypeHandle, args: Vec<TyRef>) -> Result<TyRef> {
        self.universe.intern_instantiation(def, args)
    }
}

impl InterpModule {
    /// Resolve a `TypeDef`/`TypeRef`/`TypeSpec` token to a type.
    pub(crate) fn resolve_type_token_impl(
        &self,
        token: Token,
        class_ctx: Option<&GenericContainerRef>,
        method_ctx: Option<&GenericContainerRef>,
    ) -> Result<TyRef> {
        match token.table() {
            table if table == TableId::TypeDef as u8 => {
                Ok(self.type_at(token.row())?.byval_ty())
            }
            table if table == TableId::TypeRef as u8 => self.resolve_type_ref(token.row()),
            table if table == TableId::TypeSpec as u8 => {
                let row = self
                    .image()
                    .row::<TypeSpecRow>(TableId::TypeSpec, token.row())?;
                let blob = self.image().blob(row.signature)?;
                let mut reader = SignatureReader::new(blob, self, class_ctx, method_ctx);
                reader.read_type()
            }
            _ => Err(bad_image_error!("Token {} does not name a type", token)),
        }
    }

    /// Resolve a `TypeRef` row through its resolution scope.
    fn resolve_type_ref(&self, rid: u32) -> Result<TyRef> {
        let image = self.image();
        let row = image.row::<TypeRefRow>(TableId::TypeRef, rid)?;
        let name = image.string(row.name)?;
        let namespace = image.string(row.namespace)?;

        match row.resolution_scope.tag {
            TableId::AssemblyRef => {
                let assembly_row = image
                    .row::<AssemblyRefRow>(TableId::AssemblyRef, row.resolution_scope.row)?;
                let assembly_name = image.string(assembly_row.name)?;
                let handle = self
                    .universe
                    .lookup_type(assembly_name, namespace, name)?;
                Ok(handle.byval_ty())
            }
            TableId::TypeRef => {
                // Nested type: the scope row is the enclosing type.
                if !namespace.is_empty() {
                    return Err(bad_image_error!(
                        "Nested TypeRef {} carries a namespace",
                        name
                    ));
                }
                let enclosing = self.resolve_type_ref(row.resolution_scope.row)?;
                let Some(enclosing_def) = enclosing.type_handle() else {
                    return Err(resolution_error!(
                        "Enclosing type of nested reference {} is not a definition",
                        name
                    ));
                };
                for nested in enclosing_def
                    .nested_types
                    .get()
                    .map_or(&[][..], Vec::as_slice)
                {
                    if nested.name() == name {
                        return Ok(nested.byval_ty());
                    }
                }
                Err(resolution_error!(
                    "Nested type {} not found under {}",
                    name,
                    enclosing_def.full_name()
                ))
            }
            TableId::Module | TableId::ModuleRef => Err(not_supported_error!(
                "TypeRef resolution scope {:?}",
                row.resolution_scope.tag
            )),
            other => Err(bad_image_error!("Invalid resolution scope {:?}", other)),
        }
    }

    /// Resolve and cache a type token under a generic context.
    ///
    /// # Errors
    /// Resolution failures are fatal and not cached.
    pub fn resolve_type(
        &self,
        token: Token,
        class_ctx: Option<&GenericContainerRef>,
        method_ctx: Option<&GenericContainerRef>,
        context: &GenericContext,
    ) -> Result<TyRef> {
        self.token_types
            .get_or_try_insert((token, context.clone()), || {
                let origin = self.resolve_type_token_impl(token, class_ctx, method_ctx)?;
                Ok(inflate(&origin, context))
            })
    }

    /// Resolve and cache a method token (`MethodDef`, `MemberRef` or
    /// `MethodSpec`) under a generic context.
    ///
    /// # Errors
    /// Unresolvable references and signature mismatches are fatal.
    pub fn resolve_method(
        &self,
        token: Token,
        class_ctx: Option<&GenericContainerRef>,
        method_ctx: Option<&GenericContainerRef>,
        context: &GenericContext,
    ) -> Result<ResolvedMethod> {
        self.token_methods
            .get_or_try_insert((token, context.clone()), || {
                self.resolve_method_uncached(token, class_ctx, method_ctx, context, None)
            })
    }

    fn resolve_method_uncached(
        &self,
        token: Token,
        class_ctx: Option<&GenericContainerRef>,
        method_ctx: Option<&GenericContainerRef>,
        context: &GenericContext,
        instantiation: Option<Arc<Vec<TyRef>>>,
    ) -> Result<ResolvedMethod> {
        match token.table() {
            table if table == TableId::MethodDef as u8 => {
                let method = self.method_at(token.row())?;
                let declaring = method
                    .declaring
                    .get()
                    .ok_or_else(|| resolution_error!("Method {} has no declaring type", token))?;
                let container = inflate(&declaring.byval_ty(), context);
                Ok(ResolvedMethod {
                    container,
                    method,
                    instantiation,
                })
            }
            table if table == TableId::MemberRef as u8 => {
                self.resolve_member_ref_method(token.row(), class_ctx, method_ctx, context, instantiation)
            }
            table if table == TableId::MethodSpec as u8 => {
                let row = self
                    .image()
                    .row::<MethodSpecRow>(TableId::MethodSpec, token.row())?;
                let blob = self.image().blob(row.instantiation)?;
                let mut reader = SignatureReader::new(blob, self, class_ctx, method_ctx);
                let args = reader.read_method_spec_sig()?;
                let args = Arc::new(inflate_args(&args, context));
                self.resolve_method_uncached(
                    row.method.token,
                    class_ctx,
                    method_ctx,
                    context,
                    Some(args),
                )
            }
            _ => Err(bad_image_error!("Token {} does not name a method", token)),
        }
    }

    /// Resolve a `MethodDefOrRef` coded index (explicit override records).
    pub(crate) fn resolve_method_def_or_ref(
        &self,
        coded: &CodedIndex,
        class_ctx: Option<&GenericContainerRef>,
    ) -> Result<(TyRef, MethodHandle)> {
        let resolved = self.resolve_method_uncached(
            coded.token,
            class_ctx,
            None,
            &GenericContext::default(),
            None,
        )?;
        Ok((resolved.container, resolved.method))
    }

    fn resolve_member_ref_method(
        &self,
        rid: u32,
        class_ctx: Option<&GenericContainerRef>,
        method_ctx: Option<&GenericContainerRef>,
        context: &GenericContext,
        instantiation: Option<Arc<Vec<TyRef>>>,
    ) -> Result<ResolvedMethod> {
        let image = self.image();
        let row = image.row::<MemberRefRow>(TableId::MemberRef, rid)?;
        let name = image.string(row.name)?;
        let container = self.resolve_member_ref_parent(&row.class, class_ctx, method_ctx)?;
        let container = inflate(&container, context);

        let blob = image.blob(row.signature)?;
        // Member-reference signatures decode without containers: their
        // variables stay raw and match positionally against the target.
        let mut reader = SignatureReader::new(blob, self, None, None);
        if reader.peek_is_field_sig()? {
            return Err(bad_image_error!(
                "Member reference {} names a field where a method is required",
                name
            ));
        }
        let sig = reader.read_method_ref_sig()?;

        let Some(container_def) = container.type_handle() else {
            return Err(resolution_error!(
                "Member reference {} against non-definition {}",
                name,
                container
            ));
        };

        let generic_arg_count = instantiation.as_ref().map_or(0, |args| args.len() as u32);
        for method in container_def.method_list() {
            if method.name() != name {
                continue;
            }
            let Some(def_sig) = method.signature.get() else {
                continue;
            };
            if !method_sig_matches(def_sig, &sig, generic_arg_count, method) {
                continue;
            }
            return Ok(ResolvedMethod {
                container: container.clone(),
                method: method.clone(),
                instantiation,
            });
        }

        Err(resolution_error!(
            "Method {} not found on {}",
            name,
            container_def.full_name()
        ))
    }

    /// Resolve the parent of a member reference.
    fn resolve_member_ref_parent(
        &self,
        parent: &CodedIndex,
        class_ctx: Option<&GenericContainerRef>,
        method_ctx: Option<&GenericContainerRef>,
    ) -> Result<TyRef> {
        match parent.tag {
            TableId::TypeDef | TableId::TypeRef | TableId::TypeSpec => {
                self.resolve_type_token_impl(parent.token, class_ctx, method_ctx)
            }
            TableId::MethodDef | TableId::ModuleRef => Err(not_supported_error!(
                "Member reference parent in table {:?}",
                parent.tag
            )),
            other => Err(bad_image_error!(
                "Invalid member reference parent table {:?}",
                other
            )),
        }
    }

    /// Resolve and cache a field token (`Field` or `MemberRef`) under a
    /// generic context.
    ///
    /// # Errors
    /// Unresolvable references are fatal.
    pub fn resolve_field(
        &self,
        token: Token,
        class_ctx: Option<&GenericContainerRef>,
        method_ctx: Option<&GenericContainerRef>,
        context: &GenericContext,
    ) -> Result<(TyRef, FieldHandle)> {
        self.token_fields
            .get_or_try_insert((token, context.clone()), || {
                match token.table() {
                    table if table == TableId::Field as u8 => {
                        let field = self.field_at(token.row())?;
                        let declaring = field.declaring.get().ok_or_else(|| {
                            resolution_error!("Field {} has no declaring type", token)
                        })?;
                        Ok((inflate(&declaring.byval_ty(), context), field))
                    }
                    table if table == TableId::MemberRef as u8 => {
                        self.resolve_member_ref_field(token.row(), class_ctx, method_ctx, context)
                    }
                    _ => Err(bad_image_error!("Token {} does not name a field", token)),
                }
            })
    }

    fn resolve_member_ref_field(
        &self,
        rid: u32,
        class_ctx: Option<&GenericContainerRef>,
        method_ctx: Option<&GenericContainerRef>,
        context: &GenericContext,
    ) -> Result<(TyRef, FieldHandle)> {
        let image = self.image();
        let row = image.row::<MemberRefRow>(TableId::MemberRef, rid)?;
        let name = image.string(row.name)?;
        let container = self.resolve_member_ref_parent(&row.class, class_ctx, method_ctx)?;
        let container = inflate(&container, context);

        let blob = image.blob(row.signature)?;
        let mut reader = SignatureReader::new(blob, self, None, None);
        let (sig_ty, _attrs) = reader.read_field_sig()?;

        let Some(container_def) = container.type_handle() else {
            return Err(resolution_error!(
                "Field reference {} against non-definition {}",
                name,
                container
            ));
        };

        for field in container_def.field_list() {
            if field.name() != name {
                continue;
            }
            let Ok(field_ty) = field.ty() else { continue };
            if ty_matches_sig(&field_ty, &sig_ty) {
                return Ok((container.clone(), field.clone()));
            }
        }

        Err(resolution_error!(
            "Field {} not found on {}",
            name,
            container_def.full_name()
        ))
    }

    /// Resolve a stand-alone method signature token (`calli` operand).
    ///
    /// # Errors
    /// Format violations are fatal.
    pub fn resolve_stand_alone_sig(
        &self,
        token: Token,
        class_ctx: Option<&GenericContainerRef>,
        method_ctx: Option<&GenericContainerRef>,
        context: &GenericContext,
    ) -> Result<MethodSig> {
        if token.table() != TableId::StandAloneSig as u8 {
            return Err(bad_image_error!(
                "Token {} does not name a stand-alone signature",
                token
            ));
        }
        let row = self
            .image()
            .row::<StandAloneSigRow>(TableId::StandAloneSig, token.row())?;
        let blob = self.image().blob(row.signature)?;
        let mut reader = SignatureReader::new(blob, self, class_ctx, method_ctx);
        let mut sig = reader.read_stand_alone_method_sig()?;

        if !context.is_empty() {
            sig.ret = inflate(&sig.ret, context);
            for param in &mut sig.params {
                param.ty = inflate(&param.ty, context);
            }
        }
        Ok(sig)
    }
}

/// Signature-to-definition match for member references: raw variables on
/// the reference side match the definition's bound variables positionally.
fn method_sig_matches(
    def_sig: &MethodSig,
    ref_sig: &MethodSig,
    generic_arg_count: u32,
    method: &MethodHandle,
) -> bool {
    if def_sig.params.len() != ref_sig.params.len() {
        return false;
    }
    // Generic arity must agree with the call shape.
    let declared = method
        .generic_container
        .get()
        .map_or(0, |container| container.arity());
    if declared != generic_arg_count {
        return false;
    }

    if !ty_matches_sig(&def_sig.ret, &ref_sig.ret) {
        return false;
    }
    def_sig
        .params
        .iter()
        .zip(&ref_sig.params)
        .all(|(def_param, ref_param)| ty_matches_sig(&def_param.ty, &ref_param.ty))
}

/// Structural compatibility between a resolved definition type and a
/// reference-signature type.
pub(crate) fn ty_matches_sig(def_ty: &Ty, sig_ty: &Ty) -> bool {
    match (def_ty, sig_ty) {
        (Ty::Var(param), Ty::RawVar(number)) => u32::from(param.number) == *number,
        (Ty::MVar(param), Ty::RawMVar(number)) => u32::from(param.number) == *number,
        (Ty::Var(a), Ty::Var(b)) | (Ty::MVar(a), Ty::MVar(b)) => Arc::ptr_eq(a, b),
        (Ty::Class(a), Ty::Class(b)) | (Ty::ValueType(a), Ty::ValueType(b)) => Arc::ptr_eq(a, b),
        (Ty::Ptr(a), Ty::Ptr(b))
        | (Ty::ByRef(a), Ty::ByRef(b))
        | (Ty::SzArray(a), Ty::SzArray(b)) => ty_matches_sig(a, b),
        (
            Ty::Array {
                elem: elem_a,
                rank: rank_a,
                ..
            },
            Ty::Array {
                elem: elem_b,
                rank: rank_b,
                ..
            },
        ) => rank_a == rank_b && ty_matches_sig(elem_a, elem_b),
        (
            Ty::GenericInst {
                def: def_a,
                args: args_a,
            },
            Ty::GenericInst {
                def: def_b,
                args: args_b,
            },
        ) => {
            Arc::ptr_eq(def_a, def_b)
                && args_a.len() == args_b.len()
                && args_a
                    .iter()
                    .zip(args_b)
                    .all(|(a, b)| ty_matches_sig(a, b))
        }
        _ => std::mem::discriminant(def_ty) == std::mem::discriminant(sig_ty),
    }
}
