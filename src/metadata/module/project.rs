//! The fixed-order projection passes.
//!
//! The order is load-bearing: nested-type links must exist before parents
//! resolve (a base type may be a nested class reached through a type-ref
//! chain), generic containers must exist before any signature decodes,
//! field definitions must exist before default values apply, and
//! interfaces, slots and field layout must all be complete before the two
//! vtable phases run. Each pass publishes into the set-once fields of the
//! shells created up front.

use std::collections::HashMap;
use std::sync::Arc;

use rayon::prelude::*;

use crate::{
    metadata::{
        image::RawImage,
        method::MethodBody,
        module::{AssemblyIdentity, EventDef, InterpModule, PropertyDef},
        signatures::SignatureReader,
        tables::{rows::*, CodedIndex, TableId},
        token::Token,
        typesystem::{
            ConstantValue, FieldAttributes, FieldDef, FieldHandle, GenericContainer,
            GenericContainerRef, GenericOwner, GenericParam, GenericParamRef, MethodAttributes,
            MethodDef, MethodHandle, MethodImplAttributes, MethodImplRecord, ModuleId,
            ParamAttributes, Ty, TypeAttributes, TypeDef, TypeHandle, TypeSource,
            OBJECT_HEADER_SIZE,
        },
    },
    Result,
};

/// Create the definition shells for one image.
///
/// Valueness must be known at shell time (the self type is either a class
/// or a value type), before any base type can be resolved, so it is
/// derived textually from the extends token: a type extending a `TypeRef`
/// named `System.ValueType` or `System.Enum` is a value type.
pub(crate) fn create_shells(
    id: ModuleId,
    image: &RawImage<'_>,
) -> Result<(Vec<TypeHandle>, Vec<MethodHandle>, Vec<FieldHandle>)> {
    let typedef_table = image.table::<TypeDefRow>(TableId::TypeDef)?;
    let mut types = Vec::with_capacity(typedef_table.row_count() as usize);
    for row in typedef_table.iter() {
        let handle: TypeHandle = Arc::new(TypeDef::shell(
            id,
            row.rid - 1,
            row.token,
            TypeSource::Interp(id),
        ));

        let value_type = !row.extends.is_null() && is_value_type_parent(image, &row.extends)?;
        let _ = handle.value_type.set(value_type);
        let _ = handle
            .byval
            .set(crate::metadata::typesystem::defs::byval_of(&handle));
        types.push(handle);
    }

    let method_count = image.row_count(TableId::MethodDef);
    let mut methods = Vec::with_capacity(method_count as usize);
    for rid in 1..=method_count {
        methods.push(Arc::new(MethodDef::shell(Token::from_parts(
            TableId::MethodDef as u8,
            rid,
        ))));
    }

    let field_count = image.row_count(TableId::Field);
    let mut fields = Vec::with_capacity(field_count as usize);
    for rid in 1..=field_count {
        fields.push(Arc::new(FieldDef::shell(Token::from_parts(
            TableId::Field as u8,
            rid,
        ))));
    }

    Ok((types, methods, fields))
}

/// Textual value-type check over an unresolved extends token.
fn is_value_type_parent(image: &RawImage<'_>, extends: &CodedIndex) -> Result<bool> {
    if extends.tag != TableId::TypeRef {
        return Ok(false);
    }
    let row = image.row::<TypeRefRow>(TableId::TypeRef, extends.row)?;
    if image.string(row.namespace)? != "System" {
        return Ok(false);
    }
    let name = image.string(row.name)?;
    Ok(name == "ValueType" || name == "Enum")
}

impl InterpModule {
    /// Run every projection pass, in order.
    pub(crate) fn project(&self) -> Result<()> {
        self.init_identity()?;
        self.init_generic_params()?;
        self.init_nested_classes()?;
        self.init_type_defs()?;
        self.init_generic_constraints()?;
        self.init_methods()?;
        self.init_fields()?;
        self.init_field_layouts()?;
        self.init_field_rvas()?;
        self.init_blittables();
        self.init_method_impls()?;
        self.init_properties_events()?;
        self.init_constants()?;
        self.init_custom_attributes()?;
        self.init_class_layouts()?;
        self.init_enum_elements()?;
        self.init_interfaces()?;
        self.register_into_universe()?;
        let bounds = self.init_vtables_slot_counts()?;
        self.init_vtables_assign(&bounds)?;
        Ok(())
    }

    fn init_identity(&self) -> Result<()> {
        let image = self.image();
        if image.row_count(TableId::Module) != 1 {
            return Err(bad_image_error!("Module table must have exactly one row"));
        }
        let module_row = image.row::<ModuleRow>(TableId::Module, 1)?;
        let _ = self.name.set(image.string(module_row.name)?.to_string());

        if image.row_count(TableId::Assembly) > 0 {
            let assembly_row = image.row::<AssemblyRow>(TableId::Assembly, 1)?;
            let _ = self
                .assembly
                .set(AssemblyIdentity::from_row(&assembly_row, image)?);
        }
        Ok(())
    }

    /// Build parameter handles and attach containers to their owners.
    fn init_generic_params(&self) -> Result<()> {
        let image = self.image();
        let table = image.table::<GenericParamRow>(TableId::GenericParam)?;

        // Group rows by owner, preserving declaration order.
        let mut owners: Vec<(CodedIndex, Vec<GenericParamRow>)> = Vec::new();
        for row in table.iter() {
            match owners.last_mut() {
                Some((owner, rows)) if *owner == row.owner => rows.push(row),
                _ => owners.push((row.owner, vec![row])),
            }
        }

        let mut arena: Vec<GenericParamRef> = vec![];
        for (owner, rows) in owners {
            let is_method = owner.tag == TableId::MethodDef;
            let params: Vec<GenericParamRef> = rows
                .iter()
                .map(|row| {
                    Ok(Arc::new(GenericParam {
                        number: row.number,
                        flags: row.flags,
                        name: image.string(row.name)?.to_string(),
                        is_method,
                        constraints: std::sync::OnceLock::new(),
                    }))
                })
                .collect::<Result<_>>()?;
            arena.extend(params.iter().cloned());

            match owner.tag {
                TableId::TypeDef => {
                    let handle = self.type_at(owner.row)?;
                    let container: GenericContainerRef = Arc::new(GenericContainer {
                        owner: GenericOwner::Type(handle.clone()),
                        is_method: false,
                        params,
                    });
                    let _ = handle.generic_container.set(container);
                }
                TableId::MethodDef => {
                    let handle = self.method_at(owner.row)?;
                    let container: GenericContainerRef = Arc::new(GenericContainer {
                        owner: GenericOwner::Method(handle.clone()),
                        is_method: true,
                        params,
                    });
                    let _ = handle.generic_container.set(container);
                }
                other => {
                    return Err(bad_image_error!(
                        "GenericParam owner in table {:?}",
                        other
                    ));
                }
            }
        }

        let _ = self.generic_params.set(arena);
        Ok(())
    }

    fn init_nested_classes(&self) -> Result<()> {
        let image = self.image();
        let table = image.table::<NestedClassRow>(TableId::NestedClass)?;

        let mut nested_of: HashMap<u32, Vec<TypeHandle>> = HashMap::new();
        for row in table.iter() {
            let nested = self.type_at(row.nested_class)?;
            let enclosing = self.type_at(row.enclosing_class)?;
            let _ = nested.declaring_type.set(enclosing.clone());
            nested_of
                .entry(row.enclosing_class)
                .or_default()
                .push(nested);
        }

        for (enclosing_row, nested) in nested_of {
            let enclosing = self.type_at(enclosing_row)?;
            let _ = enclosing.nested_types.set(nested);
        }
        Ok(())
    }

    /// Names, flags, member ranges and resolved base types.
    fn init_type_defs(&self) -> Result<()> {
        let image = self.image();
        let table = image.table::<TypeDefRow>(TableId::TypeDef)?;
        let rows: Vec<TypeDefRow> = table.iter().collect();
        let field_total = image.row_count(TableId::Field) + 1;
        let method_total = image.row_count(TableId::MethodDef) + 1;

        for (index, row) in rows.iter().enumerate() {
            let handle = &self.types[index];
            let _ = handle.name.set(image.string(row.name)?.to_string());
            let _ = handle
                .namespace
                .set(image.string(row.namespace)?.to_string());
            let _ = handle
                .flags
                .set(TypeAttributes::from_bits_truncate(row.flags));

            // Member ranges close at the next row's list start.
            let field_end = rows.get(index + 1).map_or(field_total, |next| next.field_list);
            let method_end = rows
                .get(index + 1)
                .map_or(method_total, |next| next.method_list);
            if row.field_list > field_end || row.method_list > method_end {
                return Err(bad_image_error!(
                    "{}: member ranges are not monotonic",
                    handle.full_name()
                ));
            }

            let fields: Vec<FieldHandle> = (row.field_list..field_end)
                .map(|rid| self.field_at(rid))
                .collect::<Result<_>>()?;
            for field in &fields {
                let _ = field.declaring.set(handle.clone());
            }
            let _ = handle.fields.set(fields);

            let methods: Vec<MethodHandle> = (row.method_list..method_end)
                .map(|rid| self.method_at(rid))
                .collect::<Result<_>>()?;
            for method in &methods {
                let _ = method.declaring.set(handle.clone());
            }
            let _ = handle.methods.set(methods);
        }

        // Second sweep: resolve base types (may reach nested classes and
        // other assemblies, hence after nesting links).
        for (index, row) in rows.iter().enumerate() {
            let handle = &self.types[index];
            if row.extends.is_null() {
                let _ = handle.parent.set(None);
                let _ = handle.enum_type.set(false);
                continue;
            }

            let class_ctx = handle.generic_container.get().cloned();
            let parent =
                self.resolve_type_token_impl(row.extends.token, class_ctx.as_ref(), None)?;

            let mut is_enum = false;
            if let Some(parent_def) = parent.type_handle() {
                if parent_def.namespace() == "System" {
                    is_enum = parent_def.name() == "Enum";
                }
            }
            let _ = handle.enum_type.set(is_enum);
            let _ = handle.parent.set(Some(parent));
        }
        Ok(())
    }

    fn init_generic_constraints(&self) -> Result<()> {
        let image = self.image();
        let table = image.table::<GenericParamConstraintRow>(TableId::GenericParamConstraint)?;
        let arena = self.generic_params.get().map_or(&[][..], Vec::as_slice);

        let mut per_param: HashMap<u32, Vec<crate::metadata::typesystem::TyRef>> = HashMap::new();
        for row in table.iter() {
            let Some(param) = row
                .owner
                .checked_sub(1)
                .and_then(|index| arena.get(index as usize))
            else {
                return Err(bad_image_error!(
                    "GenericParamConstraint owner {} out of range",
                    row.owner
                ));
            };

            // Rebuild the owner's class/method context for the constraint
            // signature.
            let (class_ctx, method_ctx) = self.contexts_of_param(param)?;
            let constraint = self.resolve_type_token_impl(
                row.constraint.token,
                class_ctx.as_ref(),
                method_ctx.as_ref(),
            )?;
            per_param.entry(row.owner).or_default().push(constraint);
        }

        for (owner_rid, constraints) in per_param {
            if let Some(param) = arena.get(owner_rid as usize - 1) {
                let _ = param.constraints.set(constraints);
            }
        }
        Ok(())
    }

    /// The generic contexts surrounding one declared parameter.
    fn contexts_of_param(
        &self,
        param: &GenericParamRef,
    ) -> Result<(Option<GenericContainerRef>, Option<GenericContainerRef>)> {
        // Find the container through the arena's owners.
        for handle in &self.types {
            if let Some(container) = handle.generic_container.get() {
                if container.params.iter().any(|p| Arc::ptr_eq(p, param)) {
                    return Ok((Some(container.clone()), None));
                }
            }
        }
        for method in &self.methods {
            if let Some(container) = method.generic_container.get() {
                if container.params.iter().any(|p| Arc::ptr_eq(p, param)) {
                    let class = Self::class_container_of(method);
                    return Ok((class, Some(container.clone())));
                }
            }
        }
        Err(bad_image_error!("Generic parameter without an owner"))
    }

    /// Method rows: attributes, bodies, signatures and parameter names.
    fn init_methods(&self) -> Result<()> {
        let image = self.image();
        let table = image.table::<MethodDefRow>(TableId::MethodDef)?;
        let rows: Vec<MethodDefRow> = table.iter().collect();
        let param_total = image.row_count(TableId::Param) + 1;

        for (index, row) in rows.iter().enumerate() {
            let method = &self.methods[index];
            let _ = method.name.set(image.string(row.name)?.to_string());
            let _ = method
                .flags
                .set(MethodAttributes::from_bits_truncate(row.flags));
            let _ = method
                .impl_flags
                .set(MethodImplAttributes::from_bits_truncate(row.impl_flags));
        }

        // Bodies are independent of one another; pre-parse them in
        // parallel before the sequential signature sweep.
        let bodies: Vec<Option<MethodBody>> = rows
            .par_iter()
            .map(|row| -> Result<Option<MethodBody>> {
                if row.rva == 0 {
                    return Ok(None);
                }
                let data = image.data_at_rva(row.rva)?;
                Ok(Some(MethodBody::parse(data)?))
            })
            .collect::<Result<_>>()?;

        for (index, body) in bodies.into_iter().enumerate() {
            let _ = self.methods[index].body.set(body.map(Arc::new));
        }

        for (index, row) in rows.iter().enumerate() {
            let method = &self.methods[index];
            let class_ctx = Self::class_container_of(method);
            let method_ctx = method.generic_container.get().cloned();
            let declared_arity = method_ctx.as_ref().map_or(0, |c| c.arity());

            let blob = image.blob(row.signature)?;
            let mut reader =
                SignatureReader::new(blob, self, class_ctx.as_ref(), method_ctx.as_ref());
            let mut sig = reader.read_method_def_sig(declared_arity)?;

            // Attach declared parameter names/flags by sequence number;
            // sequence 0 names the return value and is ignored.
            let param_end = rows
                .get(index + 1)
                .map_or(param_total, |next| next.param_list);
            for param_rid in row.param_list..param_end {
                let param_row = image.row::<ParamRow>(TableId::Param, param_rid)?;
                if param_row.sequence == 0 {
                    continue;
                }
                let Some(slot) = sig.params.get_mut(param_row.sequence as usize - 1) else {
                    return Err(bad_image_error!(
                        "{}: Param row {} names parameter {} of {}",
                        method.full_name(),
                        param_rid,
                        param_row.sequence,
                        sig.params.len()
                    ));
                };
                slot.name = Some(image.string(param_row.name)?.to_string());
                slot.attrs |= ParamAttributes::from_bits_truncate(param_row.flags);
            }
            let _ = method.signature.set(sig);

            // Locals, now that the contexts are available.
            if let Some(Some(body)) = method.body.get().map(Clone::clone) {
                if body.local_var_sig_token != 0 {
                    let sig_token = Token::new(body.local_var_sig_token);
                    if sig_token.table() != TableId::StandAloneSig as u8 {
                        return Err(bad_image_error!(
                            "{}: locals token {} is not a StandAloneSig",
                            method.full_name(),
                            sig_token
                        ));
                    }
                    let sig_row =
                        image.row::<StandAloneSigRow>(TableId::StandAloneSig, sig_token.row())?;
                    let blob = image.blob(sig_row.signature)?;
                    let mut reader =
                        SignatureReader::new(blob, self, class_ctx.as_ref(), method_ctx.as_ref());
                    let locals = reader.read_local_var_sig()?;
                    let _ = body.locals.set(locals);
                }
            }
        }
        Ok(())
    }

    fn init_fields(&self) -> Result<()> {
        let image = self.image();
        let table = image.table::<FieldRow>(TableId::Field)?;

        for (index, row) in table.iter().enumerate() {
            let field = &self.fields[index];
            let _ = field.name.set(image.string(row.name)?.to_string());
            let _ = field
                .flags
                .set(FieldAttributes::from_bits_truncate(row.flags));

            let class_ctx = field
                .declaring
                .get()
                .and_then(|declaring| declaring.generic_container.get().cloned());
            let blob = image.blob(row.signature)?;
            let mut reader = SignatureReader::new(blob, self, class_ctx.as_ref(), None);
            let (ty, _attrs) = reader.read_field_sig()?;
            let _ = field.field_ty.set(ty);
        }
        Ok(())
    }

    /// Explicit layout offsets; everything else stays for sequential
    /// layout outside the core.
    fn init_field_layouts(&self) -> Result<()> {
        let image = self.image();
        let table = image.table::<FieldLayoutRow>(TableId::FieldLayout)?;
        for row in table.iter() {
            let field = self.field_at(row.field)?;
            field.set_offset(OBJECT_HEADER_SIZE + row.field_offset);
        }
        Ok(())
    }

    fn init_field_rvas(&self) -> Result<()> {
        let image = self.image();
        let table = image.table::<FieldRvaRow>(TableId::FieldRva)?;
        for row in table.iter() {
            let field = self.field_at(row.field)?;
            let size = field.ty()?.value_size()? as usize;
            let data = image.data_at_rva(row.rva)?;
            if data.len() < size {
                return Err(bad_image_error!(
                    "Field {} initial data overruns the image",
                    field.name()
                ));
            }
            let _ = field.rva_data.set(data[..size].to_vec());
        }
        Ok(())
    }

    /// Recursive, memoized blittability over instance fields.
    fn init_blittables(&self) {
        let mut visited = vec![false; self.types.len()];
        for index in 0..self.types.len() {
            self.compute_blittable(index, &mut visited);
        }
    }

    fn compute_blittable(&self, index: usize, visited: &mut [bool]) {
        if visited[index] {
            return;
        }
        visited[index] = true;

        let handle = &self.types[index];
        if !handle.is_value_type() {
            let _ = handle.blittable.set(false);
            return;
        }

        let mut blittable = true;
        for field in handle.field_list() {
            if !field.is_instance() {
                continue;
            }
            let Ok(ty) = field.ty() else {
                blittable = false;
                break;
            };
            blittable = match ty.as_ref() {
                Ty::Bool
                | Ty::Char
                | Ty::I1
                | Ty::U1
                | Ty::I2
                | Ty::U2
                | Ty::I4
                | Ty::U4
                | Ty::I
                | Ty::U
                | Ty::I8
                | Ty::U8
                | Ty::R4
                | Ty::R8
                | Ty::Ptr(_) => true,
                Ty::ValueType(nested) => {
                    if nested.module == self.id {
                        self.compute_blittable(nested.index as usize, visited);
                    }
                    nested.blittable.get().copied().unwrap_or(false)
                }
                _ => false,
            };
            if !blittable {
                break;
            }
        }
        let _ = handle.blittable.set(blittable);
    }

    fn init_method_impls(&self) -> Result<()> {
        let image = self.image();
        let table = image.table::<MethodImplRow>(TableId::MethodImpl)?;

        let mut per_type: HashMap<u32, Vec<MethodImplRecord>> = HashMap::new();
        for row in table.iter() {
            let handle = self.type_at(row.class)?;
            let class_ctx = handle.generic_container.get().cloned();

            let body = self.resolve_method_def_or_ref(&row.method_body, class_ctx.as_ref())?;
            let declaration =
                self.resolve_method_def_or_ref(&row.method_declaration, class_ctx.as_ref())?;
            per_type
                .entry(row.class)
                .or_default()
                .push(MethodImplRecord { body, declaration });
        }

        for (type_rid, records) in per_type {
            let handle = self.type_at(type_rid)?;
            let _ = handle.method_impls.set(records);
        }
        Ok(())
    }

    /// Properties and events, then their accessor associations.
    fn init_properties_events(&self) -> Result<()> {
        let image = self.image();

        // Property map rows give each type its contiguous property range.
        let mut property_parents: Vec<Option<TypeHandle>> =
            vec![None; image.row_count(TableId::Property) as usize];
        let map = image.table::<PropertyMapRow>(TableId::PropertyMap)?;
        let map_rows: Vec<PropertyMapRow> = map.iter().collect();
        let property_total = image.row_count(TableId::Property) + 1;
        for (index, row) in map_rows.iter().enumerate() {
            let parent = self.type_at(row.parent)?;
            let end = map_rows
                .get(index + 1)
                .map_or(property_total, |next| next.property_list);
            for rid in row.property_list..end {
                if let Some(slot) = property_parents.get_mut(rid as usize - 1) {
                    *slot = Some(parent.clone());
                }
            }
        }

        let mut properties = Vec::new();
        for row in image.table::<PropertyRow>(TableId::Property)?.iter() {
            let Some(parent) = property_parents[row.rid as usize - 1].clone() else {
                return Err(bad_image_error!("Property {} has no owning map row", row.rid));
            };
            properties.push(PropertyDef {
                parent,
                name: image.string(row.name)?.to_string(),
                flags: row.flags,
                getter: None,
                setter: None,
            });
        }

        let mut event_parents: Vec<Option<TypeHandle>> =
            vec![None; image.row_count(TableId::Event) as usize];
        let map = image.table::<EventMapRow>(TableId::EventMap)?;
        let map_rows: Vec<EventMapRow> = map.iter().collect();
        let event_total = image.row_count(TableId::Event) + 1;
        for (index, row) in map_rows.iter().enumerate() {
            let parent = self.type_at(row.parent)?;
            let end = map_rows
                .get(index + 1)
                .map_or(event_total, |next| next.event_list);
            for rid in row.event_list..end {
                if let Some(slot) = event_parents.get_mut(rid as usize - 1) {
                    *slot = Some(parent.clone());
                }
            }
        }

        let mut events = Vec::new();
        for row in image.table::<EventRow>(TableId::Event)?.iter() {
            let Some(parent) = event_parents[row.rid as usize - 1].clone() else {
                return Err(bad_image_error!("Event {} has no owning map row", row.rid));
            };
            let class_ctx = parent.generic_container.get().cloned();
            let event_ty = if row.event_type.is_null() {
                Ty::Object.shared()
            } else {
                self.resolve_type_token_impl(row.event_type.token, class_ctx.as_ref(), None)?
            };
            events.push(EventDef {
                parent,
                name: image.string(row.name)?.to_string(),
                flags: row.flags,
                event_ty,
                add: None,
                remove: None,
                raise: None,
            });
        }

        // Accessor associations.
        const GETTER: u16 = 0x0002;
        const SETTER: u16 = 0x0001;
        const ADD_ON: u16 = 0x0008;
        const REMOVE_ON: u16 = 0x0010;
        const FIRE: u16 = 0x0020;

        for row in image
            .table::<MethodSemanticsRow>(TableId::MethodSemantics)?
            .iter()
        {
            let method = self.method_at(row.method)?;
            let target = row.association.row as usize - 1;
            match row.association.tag {
                TableId::Property => {
                    let Some(property) = properties.get_mut(target) else {
                        return Err(bad_image_error!("Semantics row targets missing property"));
                    };
                    if row.semantics & GETTER != 0 {
                        property.getter = Some(method.clone());
                    }
                    if row.semantics & SETTER != 0 {
                        property.setter = Some(method.clone());
                    }
                }
                TableId::Event => {
                    let Some(event) = events.get_mut(target) else {
                        return Err(bad_image_error!("Semantics row targets missing event"));
                    };
                    if row.semantics & ADD_ON != 0 {
                        event.add = Some(method.clone());
                    }
                    if row.semantics & REMOVE_ON != 0 {
                        event.remove = Some(method.clone());
                    }
                    if row.semantics & FIRE != 0 {
                        event.raise = Some(method.clone());
                    }
                }
                other => {
                    return Err(bad_image_error!("Semantics association in table {:?}", other));
                }
            }
        }

        let _ = self.properties.set(properties);
        let _ = self.events.set(events);
        Ok(())
    }

    fn init_constants(&self) -> Result<()> {
        let image = self.image();
        let mut param_defaults = Vec::new();

        for row in image.table::<ConstantRow>(TableId::Constant)?.iter() {
            let blob = image.blob(row.value)?;
            let value = decode_constant(row.base_type, blob)?;

            match row.parent.tag {
                TableId::Field => {
                    let field = self.field_at(row.parent.row)?;
                    let _ = field.default.set(value);
                }
                TableId::Param => {
                    param_defaults.push((row.parent.token, value));
                }
                TableId::Property => {
                    return Err(not_supported_error!("Property constants"));
                }
                other => {
                    return Err(bad_image_error!("Constant parent in table {:?}", other));
                }
            }
        }

        let _ = self.param_defaults.set(param_defaults);
        Ok(())
    }

    fn init_class_layouts(&self) -> Result<()> {
        let image = self.image();
        for row in image.table::<ClassLayoutRow>(TableId::ClassLayout)?.iter() {
            let handle = self.type_at(row.parent)?;
            let _ = handle.class_layout.set((row.packing_size, row.class_size));
        }
        Ok(())
    }

    /// Enum element types: the first instance field's type.
    fn init_enum_elements(&self) -> Result<()> {
        for handle in &self.types {
            if !handle.is_enum() {
                continue;
            }
            let element = handle
                .field_list()
                .iter()
                .find(|field| field.is_instance())
                .ok_or_else(|| {
                    bad_image_error!("Enum {} has no instance field", handle.full_name())
                })?
                .ty()?;
            let _ = handle.enum_element.set(element);
        }
        Ok(())
    }

    /// Direct interfaces, checked for the contiguity the table guarantees.
    fn init_interfaces(&self) -> Result<()> {
        let image = self.image();
        let table = image.table::<InterfaceImplRow>(TableId::InterfaceImpl)?;

        let mut per_type: Vec<(u32, Vec<crate::metadata::typesystem::TyRef>)> = Vec::new();
        for row in table.iter() {
            let handle = self.type_at(row.class)?;
            let class_ctx = handle.generic_container.get().cloned();
            let interface =
                self.resolve_type_token_impl(row.interface.token, class_ctx.as_ref(), None)?;

            match per_type.last_mut() {
                Some((class, interfaces)) if *class == row.class => interfaces.push(interface),
                _ => {
                    // A class whose run already closed must not reappear.
                    if per_type.iter().any(|(class, _)| *class == row.class) {
                        return Err(bad_image_error!(
                            "InterfaceImpl rows for {} are not contiguous",
                            handle.full_name()
                        ));
                    }
                    per_type.push((row.class, vec![interface]));
                }
            }
        }

        for (class, interfaces) in per_type {
            let handle = self.type_at(class)?;
            let _ = handle.interfaces.set(interfaces);
        }
        for handle in &self.types {
            let _ = handle.interfaces.set(Vec::new());
        }
        Ok(())
    }

    fn register_into_universe(&self) -> Result<()> {
        let assembly_name = self
            .assembly
            .get()
            .map_or_else(|| self.name().to_string(), |identity| identity.name.clone());
        self.universe.register_assembly(&assembly_name);
        for handle in &self.types {
            self.universe.register_type(&assembly_name, handle.clone())?;
        }
        Ok(())
    }

    /// Vtable phase 1: conservative slot-count bounds, parents first.
    fn init_vtables_slot_counts(&self) -> Result<Vec<usize>> {
        let mut bounds = vec![usize::MAX; self.types.len()];
        for index in 0..self.types.len() {
            self.slot_count_bound_of(index, &mut bounds)?;
        }
        Ok(bounds)
    }

    fn slot_count_bound_of(&self, index: usize, bounds: &mut Vec<usize>) -> Result<usize> {
        if bounds[index] != usize::MAX {
            return Ok(bounds[index]);
        }
        let handle = &self.types[index];
        if handle.is_interface() {
            bounds[index] = 0;
            return Ok(0);
        }

        let mut bound = match handle.parent_handle() {
            Some(parent) if parent.module == self.id => {
                self.slot_count_bound_of(parent.index as usize, bounds)?
            }
            Some(parent) => {
                // AOT or earlier-loaded parent: its table is final.
                self.vtables.resolve(&parent.byval_ty())?.slots.len()
            }
            None => 0,
        };

        for interface in handle.interface_list() {
            if let Some(interface_def) = interface.type_handle() {
                bound += interface_def.method_list().len();
            }
        }
        bound += handle
            .method_list()
            .iter()
            .filter(|method| method.is_virtual())
            .count();

        bounds[index] = bound;
        Ok(bound)
    }

    /// Vtable phase 2: assignment, verified against phase 1's bounds.
    fn init_vtables_assign(&self, bounds: &[usize]) -> Result<()> {
        for (index, handle) in self.types.iter().enumerate() {
            if handle.is_interface() {
                continue;
            }
            let table = self.vtables.resolve(&handle.byval_ty())?;
            if table.slots.len() > bounds[index] {
                return Err(bad_image_error!(
                    "{}: vtable has {} slots, phase-1 bound was {}",
                    handle.full_name(),
                    table.slots.len(),
                    bounds[index]
                ));
            }
        }
        Ok(())
    }

    /// Arena access helpers, 1-based like the tables; row 0 is the null
    /// reference and never names a definition.
    pub(crate) fn type_at(&self, rid: u32) -> Result<TypeHandle> {
        rid.checked_sub(1)
            .and_then(|index| self.types.get(index as usize))
            .cloned()
            .ok_or_else(|| bad_image_error!("TypeDef row {} out of range", rid))
    }

    pub(crate) fn method_at(&self, rid: u32) -> Result<MethodHandle> {
        rid.checked_sub(1)
            .and_then(|index| self.methods.get(index as usize))
            .cloned()
            .ok_or_else(|| bad_image_error!("MethodDef row {} out of range", rid))
    }

    pub(crate) fn field_at(&self, rid: u32) -> Result<FieldHandle> {
        rid.checked_sub(1)
            .and_then(|index| self.fields.get(index as usize))
            .cloned()
            .ok_or_else(|| bad_image_error!("Field row {} out of range", rid))
    }
}

/// Decode a constant blob by its element-type code.
fn decode_constant(base_type: u8, blob: &[u8]) -> Result<ConstantValue> {
    use crate::file::io::read_le;
    use crate::metadata::signatures::element_type as et;

    Ok(match base_type {
        et::BOOLEAN => ConstantValue::Bool(read_le::<u8>(blob)? != 0),
        et::CHAR => ConstantValue::Char(read_le::<u16>(blob)?),
        et::I1 => ConstantValue::I1(read_le::<i8>(blob)?),
        et::U1 => ConstantValue::U1(read_le::<u8>(blob)?),
        et::I2 => ConstantValue::I2(read_le::<i16>(blob)?),
        et::U2 => ConstantValue::U2(read_le::<u16>(blob)?),
        et::I4 => ConstantValue::I4(read_le::<i32>(blob)?),
        et::U4 => ConstantValue::U4(read_le::<u32>(blob)?),
        et::I8 => ConstantValue::I8(read_le::<i64>(blob)?),
        et::U8 => ConstantValue::U8(read_le::<u64>(blob)?),
        et::R4 => ConstantValue::R4(read_le::<f32>(blob)?),
        et::R8 => ConstantValue::R8(read_le::<f64>(blob)?),
        et::STRING => {
            let mut units = Vec::with_capacity(blob.len() / 2);
            for pair in blob.chunks_exact(2) {
                units.push(u16::from_le_bytes([pair[0], pair[1]]));
            }
            ConstantValue::String(Some(String::from_utf16_lossy(&units)))
        }
        et::CLASS => ConstantValue::Null,
        other => {
            return Err(bad_image_error!("Constant of element type {:#04x}", other));
        }
    })
}
