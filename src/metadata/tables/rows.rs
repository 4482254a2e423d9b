//! Raw row types for every supported metadata table.
//!
//! One struct per table kind, each a plain decoded record: fixed-width
//! integers, heap offsets, table indexes and [`CodedIndex`] columns. The
//! `row_size`/`read_row` pairs are the authoritative schema; the loader
//! cross-checks the computed width against the actual bytes consumed, and
//! the round-trip tests in `tests/` pin the layout against a synthetic
//! writer.
//!
//! Naming follows the binary format's tables. All row ids and list columns
//! are 1-based; a list column (`field_list`, `method_list`, `param_list`,
//! `event_list`, `property_list`) holds the first owned row, with the range
//! closed by the next row's value or the owning table's row count.

use crate::{
    file::io::{read_le_at, read_le_at_dyn},
    metadata::{
        tables::{CodedIndex, CodedIndexType, RowDefinition, TableId, TableInfoRef},
        token::Token,
    },
    Result,
};

macro_rules! row_token {
    ($table:expr, $rid:expr) => {
        Token::new($table.token_base() | $rid)
    };
}

/// `Module` table row: the identity of the current module.
pub struct ModuleRow {
    /// 1-based row id
    pub rid: u32,
    /// Token of this row
    pub token: Token,
    /// Generation counter (reserved, 0)
    pub generation: u16,
    /// `#Strings` offset of the module name
    pub name: u32,
    /// `#GUID` index of the module version id
    pub mvid: u32,
    /// `#GUID` index for edit-and-continue (reserved)
    pub enc_id: u32,
    /// `#GUID` index for edit-and-continue (reserved)
    pub enc_base_id: u32,
}

impl RowDefinition for ModuleRow {
    #[rustfmt::skip]
    fn row_size(info: &TableInfoRef) -> u32 {
        u32::from(
            /* generation */    2 +
            /* name */          info.str_bytes() +
            /* mvid */          info.guid_bytes() +
            /* enc_id */        info.guid_bytes() +
            /* enc_base_id */   info.guid_bytes()
        )
    }

    fn read_row(data: &[u8], offset: &mut usize, rid: u32, info: &TableInfoRef) -> Result<Self> {
        Ok(ModuleRow {
            rid,
            token: row_token!(TableId::Module, rid),
            generation: read_le_at::<u16>(data, offset)?,
            name: read_le_at_dyn(data, offset, info.is_large_str())?,
            mvid: read_le_at_dyn(data, offset, info.is_large_guid())?,
            enc_id: read_le_at_dyn(data, offset, info.is_large_guid())?,
            enc_base_id: read_le_at_dyn(data, offset, info.is_large_guid())?,
        })
    }
}

/// `TypeRef` table row: a type living in another scope.
pub struct TypeRefRow {
    /// 1-based row id
    pub rid: u32,
    /// Token of this row
    pub token: Token,
    /// Where the type lives (module, module ref, assembly ref or outer
    /// type ref for nested types)
    pub resolution_scope: CodedIndex,
    /// `#Strings` offset of the type name
    pub name: u32,
    /// `#Strings` offset of the namespace
    pub namespace: u32,
}

impl RowDefinition for TypeRefRow {
    #[rustfmt::skip]
    fn row_size(info: &TableInfoRef) -> u32 {
        u32::from(
            /* resolution_scope */  info.coded_index_bytes(CodedIndexType::ResolutionScope) +
            /* name */              info.str_bytes() +
            /* namespace */         info.str_bytes()
        )
    }

    fn read_row(data: &[u8], offset: &mut usize, rid: u32, info: &TableInfoRef) -> Result<Self> {
        Ok(TypeRefRow {
            rid,
            token: row_token!(TableId::TypeRef, rid),
            resolution_scope: CodedIndex::read(data, offset, info, CodedIndexType::ResolutionScope)?,
            name: read_le_at_dyn(data, offset, info.is_large_str())?,
            namespace: read_le_at_dyn(data, offset, info.is_large_str())?,
        })
    }
}

/// `TypeDef` table row: a type defined by this module.
pub struct TypeDefRow {
    /// 1-based row id
    pub rid: u32,
    /// Token of this row
    pub token: Token,
    /// Type attribute flags
    pub flags: u32,
    /// `#Strings` offset of the type name
    pub name: u32,
    /// `#Strings` offset of the namespace
    pub namespace: u32,
    /// Base type (null for `System.Object` and interfaces)
    pub extends: CodedIndex,
    /// First owned `Field` row
    pub field_list: u32,
    /// First owned `MethodDef` row
    pub method_list: u32,
}

impl RowDefinition for TypeDefRow {
    #[rustfmt::skip]
    fn row_size(info: &TableInfoRef) -> u32 {
        u32::from(
            /* flags */       4 +
            /* name */        info.str_bytes() +
            /* namespace */   info.str_bytes() +
            /* extends */     info.coded_index_bytes(CodedIndexType::TypeDefOrRef) +
            /* field_list */  info.table_index_bytes(TableId::Field) +
            /* method_list */ info.table_index_bytes(TableId::MethodDef)
        )
    }

    fn read_row(data: &[u8], offset: &mut usize, rid: u32, info: &TableInfoRef) -> Result<Self> {
        Ok(TypeDefRow {
            rid,
            token: row_token!(TableId::TypeDef, rid),
            flags: read_le_at::<u32>(data, offset)?,
            name: read_le_at_dyn(data, offset, info.is_large_str())?,
            namespace: read_le_at_dyn(data, offset, info.is_large_str())?,
            extends: CodedIndex::read(data, offset, info, CodedIndexType::TypeDefOrRef)?,
            field_list: read_le_at_dyn(data, offset, info.is_large(TableId::Field))?,
            method_list: read_le_at_dyn(data, offset, info.is_large(TableId::MethodDef))?,
        })
    }
}

/// `FieldPtr` indirection row.
pub struct FieldPtrRow {
    /// 1-based row id
    pub rid: u32,
    /// Referenced `Field` row
    pub field: u32,
}

impl RowDefinition for FieldPtrRow {
    fn row_size(info: &TableInfoRef) -> u32 {
        u32::from(info.table_index_bytes(TableId::Field))
    }

    fn read_row(data: &[u8], offset: &mut usize, rid: u32, info: &TableInfoRef) -> Result<Self> {
        Ok(FieldPtrRow {
            rid,
            field: read_le_at_dyn(data, offset, info.is_large(TableId::Field))?,
        })
    }
}

/// `Field` table row.
pub struct FieldRow {
    /// 1-based row id
    pub rid: u32,
    /// Token of this row
    pub token: Token,
    /// Field attribute flags
    pub flags: u16,
    /// `#Strings` offset of the field name
    pub name: u32,
    /// `#Blob` offset of the field signature
    pub signature: u32,
}

impl RowDefinition for FieldRow {
    #[rustfmt::skip]
    fn row_size(info: &TableInfoRef) -> u32 {
        u32::from(
            /* flags */     2 +
            /* name */      info.str_bytes() +
            /* signature */ info.blob_bytes()
        )
    }

    fn read_row(data: &[u8], offset: &mut usize, rid: u32, info: &TableInfoRef) -> Result<Self> {
        Ok(FieldRow {
            rid,
            token: row_token!(TableId::Field, rid),
            flags: read_le_at::<u16>(data, offset)?,
            name: read_le_at_dyn(data, offset, info.is_large_str())?,
            signature: read_le_at_dyn(data, offset, info.is_large_blob())?,
        })
    }
}

/// `MethodPtr` indirection row.
pub struct MethodPtrRow {
    /// 1-based row id
    pub rid: u32,
    /// Referenced `MethodDef` row
    pub method: u32,
}

impl RowDefinition for MethodPtrRow {
    fn row_size(info: &TableInfoRef) -> u32 {
        u32::from(info.table_index_bytes(TableId::MethodDef))
    }

    fn read_row(data: &[u8], offset: &mut usize, rid: u32, info: &TableInfoRef) -> Result<Self> {
        Ok(MethodPtrRow {
            rid,
            method: read_le_at_dyn(data, offset, info.is_large(TableId::MethodDef))?,
        })
    }
}

/// `MethodDef` table row.
pub struct MethodDefRow {
    /// 1-based row id
    pub rid: u32,
    /// Token of this row
    pub token: Token,
    /// RVA of the method body (0 for abstract/extern methods)
    pub rva: u32,
    /// Implementation flags
    pub impl_flags: u16,
    /// Method attribute flags
    pub flags: u16,
    /// `#Strings` offset of the method name
    pub name: u32,
    /// `#Blob` offset of the method signature
    pub signature: u32,
    /// First owned `Param` row
    pub param_list: u32,
}

impl RowDefinition for MethodDefRow {
    #[rustfmt::skip]
    fn row_size(info: &TableInfoRef) -> u32 {
        u32::from(
            /* rva */        4 +
            /* impl_flags */ 2 +
            /* flags */      2 +
            /* name */       info.str_bytes() +
            /* signature */  info.blob_bytes() +
            /* param_list */ info.table_index_bytes(TableId::Param)
        )
    }

    fn read_row(data: &[u8], offset: &mut usize, rid: u32, info: &TableInfoRef) -> Result<Self> {
        Ok(MethodDefRow {
            rid,
            token: row_token!(TableId::MethodDef, rid),
            rva: read_le_at::<u32>(data, offset)?,
            impl_flags: read_le_at::<u16>(data, offset)?,
            flags: read_le_at::<u16>(data, offset)?,
            name: read_le_at_dyn(data, offset, info.is_large_str())?,
            signature: read_le_at_dyn(data, offset, info.is_large_blob())?,
            param_list: read_le_at_dyn(data, offset, info.is_large(TableId::Param))?,
        })
    }
}

/// `ParamPtr` indirection row.
pub struct ParamPtrRow {
    /// 1-based row id
    pub rid: u32,
    /// Referenced `Param` row
    pub param: u32,
}

impl RowDefinition for ParamPtrRow {
    fn row_size(info: &TableInfoRef) -> u32 {
        u32::from(info.table_index_bytes(TableId::Param))
    }

    fn read_row(data: &[u8], offset: &mut usize, rid: u32, info: &TableInfoRef) -> Result<Self> {
        Ok(ParamPtrRow {
            rid,
            param: read_le_at_dyn(data, offset, info.is_large(TableId::Param))?,
        })
    }
}

/// `Param` table row.
pub struct ParamRow {
    /// 1-based row id
    pub rid: u32,
    /// Token of this row
    pub token: Token,
    /// Parameter attribute flags
    pub flags: u16,
    /// 1-based parameter position; 0 names the return value
    pub sequence: u16,
    /// `#Strings` offset of the parameter name
    pub name: u32,
}

impl RowDefinition for ParamRow {
    #[rustfmt::skip]
    fn row_size(info: &TableInfoRef) -> u32 {
        u32::from(
            /* flags */    2 +
            /* sequence */ 2 +
            /* name */     info.str_bytes()
        )
    }

    fn read_row(data: &[u8], offset: &mut usize, rid: u32, info: &TableInfoRef) -> Result<Self> {
        Ok(ParamRow {
            rid,
            token: row_token!(TableId::Param, rid),
            flags: read_le_at::<u16>(data, offset)?,
            sequence: read_le_at::<u16>(data, offset)?,
            name: read_le_at_dyn(data, offset, info.is_large_str())?,
        })
    }
}

/// `InterfaceImpl` table row.
pub struct InterfaceImplRow {
    /// 1-based row id
    pub rid: u32,
    /// Implementing `TypeDef` row
    pub class: u32,
    /// The implemented interface
    pub interface: CodedIndex,
}

impl RowDefinition for InterfaceImplRow {
    #[rustfmt::skip]
    fn row_size(info: &TableInfoRef) -> u32 {
        u32::from(
            /* class */     info.table_index_bytes(TableId::TypeDef) +
            /* interface */ info.coded_index_bytes(CodedIndexType::TypeDefOrRef)
        )
    }

    fn read_row(data: &[u8], offset: &mut usize, rid: u32, info: &TableInfoRef) -> Result<Self> {
        Ok(InterfaceImplRow {
            rid,
            class: read_le_at_dyn(data, offset, info.is_large(TableId::TypeDef))?,
            interface: CodedIndex::read(data, offset, info, CodedIndexType::TypeDefOrRef)?,
        })
    }
}

/// `MemberRef` table row: a method or field referenced by name + signature.
pub struct MemberRefRow {
    /// 1-based row id
    pub rid: u32,
    /// Token of this row
    pub token: Token,
    /// The type (or module) declaring the member
    pub class: CodedIndex,
    /// `#Strings` offset of the member name
    pub name: u32,
    /// `#Blob` offset of the member signature
    pub signature: u32,
}

impl RowDefinition for MemberRefRow {
    #[rustfmt::skip]
    fn row_size(info: &TableInfoRef) -> u32 {
        u32::from(
            /* class */     info.coded_index_bytes(CodedIndexType::MemberRefParent) +
            /* name */      info.str_bytes() +
            /* signature */ info.blob_bytes()
        )
    }

    fn read_row(data: &[u8], offset: &mut usize, rid: u32, info: &TableInfoRef) -> Result<Self> {
        Ok(MemberRefRow {
            rid,
            token: row_token!(TableId::MemberRef, rid),
            class: CodedIndex::read(data, offset, info, CodedIndexType::MemberRefParent)?,
            name: read_le_at_dyn(data, offset, info.is_large_str())?,
            signature: read_le_at_dyn(data, offset, info.is_large_blob())?,
        })
    }
}

/// `Constant` table row: a compile-time default value.
pub struct ConstantRow {
    /// 1-based row id
    pub rid: u32,
    /// Element-type code of the value (low byte; the second byte is
    /// padding)
    pub base_type: u8,
    /// The field, param or property owning the constant
    pub parent: CodedIndex,
    /// `#Blob` offset of the value bytes
    pub value: u32,
}

impl RowDefinition for ConstantRow {
    #[rustfmt::skip]
    fn row_size(info: &TableInfoRef) -> u32 {
        u32::from(
            /* base_type + pad */ 2 +
            /* parent */          info.coded_index_bytes(CodedIndexType::HasConstant) +
            /* value */           info.blob_bytes()
        )
    }

    fn read_row(data: &[u8], offset: &mut usize, rid: u32, info: &TableInfoRef) -> Result<Self> {
        let base_type = read_le_at::<u8>(data, offset)?;
        let _padding = read_le_at::<u8>(data, offset)?;
        Ok(ConstantRow {
            rid,
            base_type,
            parent: CodedIndex::read(data, offset, info, CodedIndexType::HasConstant)?,
            value: read_le_at_dyn(data, offset, info.is_large_blob())?,
        })
    }
}

/// `CustomAttribute` table row.
pub struct CustomAttributeRow {
    /// 1-based row id
    pub rid: u32,
    /// The attributed entity
    pub parent: CodedIndex,
    /// The attribute constructor (`MethodDef` or `MemberRef`)
    pub constructor: CodedIndex,
    /// `#Blob` offset of the encoded arguments (0 for default ctor)
    pub value: u32,
}

impl RowDefinition for CustomAttributeRow {
    #[rustfmt::skip]
    fn row_size(info: &TableInfoRef) -> u32 {
        u32::from(
            /* parent */      info.coded_index_bytes(CodedIndexType::HasCustomAttribute) +
            /* constructor */ info.coded_index_bytes(CodedIndexType::CustomAttributeType) +
            /* value */       info.blob_bytes()
        )
    }

    fn read_row(data: &[u8], offset: &mut usize, rid: u32, info: &TableInfoRef) -> Result<Self> {
        Ok(CustomAttributeRow {
            rid,
            parent: CodedIndex::read(data, offset, info, CodedIndexType::HasCustomAttribute)?,
            constructor: CodedIndex::read(data, offset, info, CodedIndexType::CustomAttributeType)?,
            value: read_le_at_dyn(data, offset, info.is_large_blob())?,
        })
    }
}

/// `FieldMarshal` table row.
pub struct FieldMarshalRow {
    /// 1-based row id
    pub rid: u32,
    /// The marshalled field or parameter
    pub parent: CodedIndex,
    /// `#Blob` offset of the native type descriptor
    pub native_type: u32,
}

impl RowDefinition for FieldMarshalRow {
    #[rustfmt::skip]
    fn row_size(info: &TableInfoRef) -> u32 {
        u32::from(
            /* parent */      info.coded_index_bytes(CodedIndexType::HasFieldMarshal) +
            /* native_type */ info.blob_bytes()
        )
    }

    fn read_row(data: &[u8], offset: &mut usize, rid: u32, info: &TableInfoRef) -> Result<Self> {
        Ok(FieldMarshalRow {
            rid,
            parent: CodedIndex::read(data, offset, info, CodedIndexType::HasFieldMarshal)?,
            native_type: read_le_at_dyn(data, offset, info.is_large_blob())?,
        })
    }
}

/// `DeclSecurity` table row.
pub struct DeclSecurityRow {
    /// 1-based row id
    pub rid: u32,
    /// Security action code
    pub action: u16,
    /// The secured entity
    pub parent: CodedIndex,
    /// `#Blob` offset of the permission set
    pub permission_set: u32,
}

impl RowDefinition for DeclSecurityRow {
    #[rustfmt::skip]
    fn row_size(info: &TableInfoRef) -> u32 {
        u32::from(
            /* action */         2 +
            /* parent */         info.coded_index_bytes(CodedIndexType::HasDeclSecurity) +
            /* permission_set */ info.blob_bytes()
        )
    }

    fn read_row(data: &[u8], offset: &mut usize, rid: u32, info: &TableInfoRef) -> Result<Self> {
        Ok(DeclSecurityRow {
            rid,
            action: read_le_at::<u16>(data, offset)?,
            parent: CodedIndex::read(data, offset, info, CodedIndexType::HasDeclSecurity)?,
            permission_set: read_le_at_dyn(data, offset, info.is_large_blob())?,
        })
    }
}

/// `ClassLayout` table row: explicit packing and size.
pub struct ClassLayoutRow {
    /// 1-based row id
    pub rid: u32,
    /// Field packing alignment (0 = default)
    pub packing_size: u16,
    /// Explicit instance size (0 = computed)
    pub class_size: u32,
    /// The `TypeDef` row this layout belongs to
    pub parent: u32,
}

impl RowDefinition for ClassLayoutRow {
    #[rustfmt::skip]
    fn row_size(info: &TableInfoRef) -> u32 {
        u32::from(
            /* packing_size */ 2u8 +
            /* class_size */   4 +
            /* parent */       info.table_index_bytes(TableId::TypeDef)
        )
    }

    fn read_row(data: &[u8], offset: &mut usize, rid: u32, info: &TableInfoRef) -> Result<Self> {
        Ok(ClassLayoutRow {
            rid,
            packing_size: read_le_at::<u16>(data, offset)?,
            class_size: read_le_at::<u32>(data, offset)?,
            parent: read_le_at_dyn(data, offset, info.is_large(TableId::TypeDef))?,
        })
    }
}

/// `FieldLayout` table row: explicit field offset.
pub struct FieldLayoutRow {
    /// 1-based row id
    pub rid: u32,
    /// Byte offset of the field within the instance
    pub field_offset: u32,
    /// The `Field` row this offset belongs to
    pub field: u32,
}

impl RowDefinition for FieldLayoutRow {
    #[rustfmt::skip]
    fn row_size(info: &TableInfoRef) -> u32 {
        u32::from(
            /* field_offset */ 4u8 +
            /* field */        info.table_index_bytes(TableId::Field)
        )
    }

    fn read_row(data: &[u8], offset: &mut usize, rid: u32, info: &TableInfoRef) -> Result<Self> {
        Ok(FieldLayoutRow {
            rid,
            field_offset: read_le_at::<u32>(data, offset)?,
            field: read_le_at_dyn(data, offset, info.is_large(TableId::Field))?,
        })
    }
}

/// `StandAloneSig` table row.
pub struct StandAloneSigRow {
    /// 1-based row id
    pub rid: u32,
    /// Token of this row
    pub token: Token,
    /// `#Blob` offset of the signature
    pub signature: u32,
}

impl RowDefinition for StandAloneSigRow {
    fn row_size(info: &TableInfoRef) -> u32 {
        u32::from(info.blob_bytes())
    }

    fn read_row(data: &[u8], offset: &mut usize, rid: u32, info: &TableInfoRef) -> Result<Self> {
        Ok(StandAloneSigRow {
            rid,
            token: row_token!(TableId::StandAloneSig, rid),
            signature: read_le_at_dyn(data, offset, info.is_large_blob())?,
        })
    }
}

/// `EventMap` table row.
pub struct EventMapRow {
    /// 1-based row id
    pub rid: u32,
    /// The `TypeDef` row owning the events
    pub parent: u32,
    /// First owned `Event` row
    pub event_list: u32,
}

impl RowDefinition for EventMapRow {
    #[rustfmt::skip]
    fn row_size(info: &TableInfoRef) -> u32 {
        u32::from(
            /* parent */     info.table_index_bytes(TableId::TypeDef) +
            /* event_list */ info.table_index_bytes(TableId::Event)
        )
    }

    fn read_row(data: &[u8], offset: &mut usize, rid: u32, info: &TableInfoRef) -> Result<Self> {
        Ok(EventMapRow {
            rid,
            parent: read_le_at_dyn(data, offset, info.is_large(TableId::TypeDef))?,
            event_list: read_le_at_dyn(data, offset, info.is_large(TableId::Event))?,
        })
    }
}

/// `EventPtr` indirection row.
pub struct EventPtrRow {
    /// 1-based row id
    pub rid: u32,
    /// Referenced `Event` row
    pub event: u32,
}

impl RowDefinition for EventPtrRow {
    fn row_size(info: &TableInfoRef) -> u32 {
        u32::from(info.table_index_bytes(TableId::Event))
    }

    fn read_row(data: &[u8], offset: &mut usize, rid: u32, info: &TableInfoRef) -> Result<Self> {
        Ok(EventPtrRow {
            rid,
            event: read_le_at_dyn(data, offset, info.is_large(TableId::Event))?,
        })
    }
}

/// `Event` table row.
pub struct EventRow {
    /// 1-based row id
    pub rid: u32,
    /// Token of this row
    pub token: Token,
    /// Event attribute flags
    pub flags: u16,
    /// `#Strings` offset of the event name
    pub name: u32,
    /// The delegate type of the event
    pub event_type: CodedIndex,
}

impl RowDefinition for EventRow {
    #[rustfmt::skip]
    fn row_size(info: &TableInfoRef) -> u32 {
        u32::from(
            /* flags */      2 +
            /* name */       info.str_bytes() +
            /* event_type */ info.coded_index_bytes(CodedIndexType::TypeDefOrRef)
        )
    }

    fn read_row(data: &[u8], offset: &mut usize, rid: u32, info: &TableInfoRef) -> Result<Self> {
        Ok(EventRow {
            rid,
            token: row_token!(TableId::Event, rid),
            flags: read_le_at::<u16>(data, offset)?,
            name: read_le_at_dyn(data, offset, info.is_large_str())?,
            event_type: CodedIndex::read(data, offset, info, CodedIndexType::TypeDefOrRef)?,
        })
    }
}

/// `PropertyMap` table row.
pub struct PropertyMapRow {
    /// 1-based row id
    pub rid: u32,
    /// The `TypeDef` row owning the properties
    pub parent: u32,
    /// First owned `Property` row
    pub property_list: u32,
}

impl RowDefinition for PropertyMapRow {
    #[rustfmt::skip]
    fn row_size(info: &TableInfoRef) -> u32 {
        u32::from(
            /* parent */        info.table_index_bytes(TableId::TypeDef) +
            /* property_list */ info.table_index_bytes(TableId::Property)
        )
    }

    fn read_row(data: &[u8], offset: &mut usize, rid: u32, info: &TableInfoRef) -> Result<Self> {
        Ok(PropertyMapRow {
            rid,
            parent: read_le_at_dyn(data, offset, info.is_large(TableId::TypeDef))?,
            property_list: read_le_at_dyn(data, offset, info.is_large(TableId::Property))?,
        })
    }
}

/// `PropertyPtr` indirection row.
pub struct PropertyPtrRow {
    /// 1-based row id
    pub rid: u32,
    /// Referenced `Property` row
    pub property: u32,
}

impl RowDefinition for PropertyPtrRow {
    fn row_size(info: &TableInfoRef) -> u32 {
        u32::from(info.table_index_bytes(TableId::Property))
    }

    fn read_row(data: &[u8], offset: &mut usize, rid: u32, info: &TableInfoRef) -> Result<Self> {
        Ok(PropertyPtrRow {
            rid,
            property: read_le_at_dyn(data, offset, info.is_large(TableId::Property))?,
        })
    }
}

/// `Property` table row.
pub struct PropertyRow {
    /// 1-based row id
    pub rid: u32,
    /// Token of this row
    pub token: Token,
    /// Property attribute flags
    pub flags: u16,
    /// `#Strings` offset of the property name
    pub name: u32,
    /// `#Blob` offset of the property signature
    pub signature: u32,
}

impl RowDefinition for PropertyRow {
    #[rustfmt::skip]
    fn row_size(info: &TableInfoRef) -> u32 {
        u32::from(
            /* flags */     2 +
            /* name */      info.str_bytes() +
            /* signature */ info.blob_bytes()
        )
    }

    fn read_row(data: &[u8], offset: &mut usize, rid: u32, info: &TableInfoRef) -> Result<Self> {
        Ok(PropertyRow {
            rid,
            token: row_token!(TableId::Property, rid),
            flags: read_le_at::<u16>(data, offset)?,
            name: read_le_at_dyn(data, offset, info.is_large_str())?,
            signature: read_le_at_dyn(data, offset, info.is_large_blob())?,
        })
    }
}

/// `MethodSemantics` table row: associates accessor methods with their
/// property or event.
pub struct MethodSemanticsRow {
    /// 1-based row id
    pub rid: u32,
    /// Semantics flags (getter/setter/add/remove/fire/other)
    pub semantics: u16,
    /// The accessor `MethodDef` row
    pub method: u32,
    /// The owning property or event
    pub association: CodedIndex,
}

impl RowDefinition for MethodSemanticsRow {
    #[rustfmt::skip]
    fn row_size(info: &TableInfoRef) -> u32 {
        u32::from(
            /* semantics */   2 +
            /* method */      info.table_index_bytes(TableId::MethodDef) +
            /* association */ info.coded_index_bytes(CodedIndexType::HasSemantics)
        )
    }

    fn read_row(data: &[u8], offset: &mut usize, rid: u32, info: &TableInfoRef) -> Result<Self> {
        Ok(MethodSemanticsRow {
            rid,
            semantics: read_le_at::<u16>(data, offset)?,
            method: read_le_at_dyn(data, offset, info.is_large(TableId::MethodDef))?,
            association: CodedIndex::read(data, offset, info, CodedIndexType::HasSemantics)?,
        })
    }
}

/// `MethodImpl` table row: an explicit override record.
pub struct MethodImplRow {
    /// 1-based row id
    pub rid: u32,
    /// The `TypeDef` row the override applies to
    pub class: u32,
    /// The implementing method
    pub method_body: CodedIndex,
    /// The overridden declaration
    pub method_declaration: CodedIndex,
}

impl RowDefinition for MethodImplRow {
    #[rustfmt::skip]
    fn row_size(info: &TableInfoRef) -> u32 {
        u32::from(
            /* class */              info.table_index_bytes(TableId::TypeDef) +
            /* method_body */        info.coded_index_bytes(CodedIndexType::MethodDefOrRef) +
            /* method_declaration */ info.coded_index_bytes(CodedIndexType::MethodDefOrRef)
        )
    }

    fn read_row(data: &[u8], offset: &mut usize, rid: u32, info: &TableInfoRef) -> Result<Self> {
        Ok(MethodImplRow {
            rid,
            class: read_le_at_dyn(data, offset, info.is_large(TableId::TypeDef))?,
            method_body: CodedIndex::read(data, offset, info, CodedIndexType::MethodDefOrRef)?,
            method_declaration: CodedIndex::read(
                data,
                offset,
                info,
                CodedIndexType::MethodDefOrRef,
            )?,
        })
    }
}

/// `ModuleRef` table row.
pub struct ModuleRefRow {
    /// 1-based row id
    pub rid: u32,
    /// Token of this row
    pub token: Token,
    /// `#Strings` offset of the referenced module name
    pub name: u32,
}

impl RowDefinition for ModuleRefRow {
    fn row_size(info: &TableInfoRef) -> u32 {
        u32::from(info.str_bytes())
    }

    fn read_row(data: &[u8], offset: &mut usize, rid: u32, info: &TableInfoRef) -> Result<Self> {
        Ok(ModuleRefRow {
            rid,
            token: row_token!(TableId::ModuleRef, rid),
            name: read_le_at_dyn(data, offset, info.is_large_str())?,
        })
    }
}

/// `TypeSpec` table row.
pub struct TypeSpecRow {
    /// 1-based row id
    pub rid: u32,
    /// Token of this row
    pub token: Token,
    /// `#Blob` offset of the type signature
    pub signature: u32,
}

impl RowDefinition for TypeSpecRow {
    fn row_size(info: &TableInfoRef) -> u32 {
        u32::from(info.blob_bytes())
    }

    fn read_row(data: &[u8], offset: &mut usize, rid: u32, info: &TableInfoRef) -> Result<Self> {
        Ok(TypeSpecRow {
            rid,
            token: row_token!(TableId::TypeSpec, rid),
            signature: read_le_at_dyn(data, offset, info.is_large_blob())?,
        })
    }
}

/// `ImplMap` table row: a P/Invoke mapping.
pub struct ImplMapRow {
    /// 1-based row id
    pub rid: u32,
    /// Mapping flags
    pub mapping_flags: u16,
    /// The forwarded field or method
    pub member_forwarded: CodedIndex,
    /// `#Strings` offset of the import name
    pub import_name: u32,
    /// The `ModuleRef` row of the target module
    pub import_scope: u32,
}

impl RowDefinition for ImplMapRow {
    #[rustfmt::skip]
    fn row_size(info: &TableInfoRef) -> u32 {
        u32::from(
            /* mapping_flags */    2 +
            /* member_forwarded */ info.coded_index_bytes(CodedIndexType::MemberForwarded) +
            /* import_name */      info.str_bytes() +
            /* import_scope */     info.table_index_bytes(TableId::ModuleRef)
        )
    }

    fn read_row(data: &[u8], offset: &mut usize, rid: u32, info: &TableInfoRef) -> Result<Self> {
        Ok(ImplMapRow {
            rid,
            mapping_flags: read_le_at::<u16>(data, offset)?,
            member_forwarded: CodedIndex::read(data, offset, info, CodedIndexType::MemberForwarded)?,
            import_name: read_le_at_dyn(data, offset, info.is_large_str())?,
            import_scope: read_le_at_dyn(data, offset, info.is_large(TableId::ModuleRef))?,
        })
    }
}

/// `FieldRva` table row: initial data for a mapped field.
pub struct FieldRvaRow {
    /// 1-based row id
    pub rid: u32,
    /// RVA of the initial data
    pub rva: u32,
    /// The `Field` row the data belongs to
    pub field: u32,
}

impl RowDefinition for FieldRvaRow {
    #[rustfmt::skip]
    fn row_size(info: &TableInfoRef) -> u32 {
        u32::from(
            /* rva */   4u8 +
            /* field */ info.table_index_bytes(TableId::Field)
        )
    }

    fn read_row(data: &[u8], offset: &mut usize, rid: u32, info: &TableInfoRef) -> Result<Self> {
        Ok(FieldRvaRow {
            rid,
            rva: read_le_at::<u32>(data, offset)?,
            field: read_le_at_dyn(data, offset, info.is_large(TableId::Field))?,
        })
    }
}

/// `Assembly` table row: this assembly's identity.
pub struct AssemblyRow {
    /// 1-based row id
    pub rid: u32,
    /// Hash algorithm id
    pub hash_alg_id: u32,
    /// Major version
    pub major_version: u16,
    /// Minor version
    pub minor_version: u16,
    /// Build number
    pub build_number: u16,
    /// Revision number
    pub revision_number: u16,
    /// Assembly flags
    pub flags: u32,
    /// `#Blob` offset of the public key (0 if unsigned)
    pub public_key: u32,
    /// `#Strings` offset of the simple name
    pub name: u32,
    /// `#Strings` offset of the culture
    pub culture: u32,
}

impl RowDefinition for AssemblyRow {
    #[rustfmt::skip]
    fn row_size(info: &TableInfoRef) -> u32 {
        u32::from(
            /* hash_alg_id */  4 +
            /* versions */     2 + 2 + 2 + 2 +
            /* flags */        4 +
            /* public_key */   info.blob_bytes() +
            /* name */         info.str_bytes() +
            /* culture */      info.str_bytes()
        )
    }

    fn read_row(data: &[u8], offset: &mut usize, rid: u32, info: &TableInfoRef) -> Result<Self> {
        Ok(AssemblyRow {
            rid,
            hash_alg_id: read_le_at::<u32>(data, offset)?,
            major_version: read_le_at::<u16>(data, offset)?,
            minor_version: read_le_at::<u16>(data, offset)?,
            build_number: read_le_at::<u16>(data, offset)?,
            revision_number: read_le_at::<u16>(data, offset)?,
            flags: read_le_at::<u32>(data, offset)?,
            public_key: read_le_at_dyn(data, offset, info.is_large_blob())?,
            name: read_le_at_dyn(data, offset, info.is_large_str())?,
            culture: read_le_at_dyn(data, offset, info.is_large_str())?,
        })
    }
}

/// `AssemblyProcessor` legacy row.
pub struct AssemblyProcessorRow {
    /// 1-based row id
    pub rid: u32,
    /// Processor architecture id
    pub processor: u32,
}

impl RowDefinition for AssemblyProcessorRow {
    fn row_size(_info: &TableInfoRef) -> u32 {
        4
    }

    fn read_row(data: &[u8], offset: &mut usize, rid: u32, _info: &TableInfoRef) -> Result<Self> {
        Ok(AssemblyProcessorRow {
            rid,
            processor: read_le_at::<u32>(data, offset)?,
        })
    }
}

/// `AssemblyOs` legacy row.
pub struct AssemblyOsRow {
    /// 1-based row id
    pub rid: u32,
    /// Platform id
    pub platform_id: u32,
    /// OS major version
    pub major_version: u32,
    /// OS minor version
    pub minor_version: u32,
}

impl RowDefinition for AssemblyOsRow {
    fn row_size(_info: &TableInfoRef) -> u32 {
        12
    }

    fn read_row(data: &[u8], offset: &mut usize, rid: u32, _info: &TableInfoRef) -> Result<Self> {
        Ok(AssemblyOsRow {
            rid,
            platform_id: read_le_at::<u32>(data, offset)?,
            major_version: read_le_at::<u32>(data, offset)?,
            minor_version: read_le_at::<u32>(data, offset)?,
        })
    }
}

/// `AssemblyRef` table row: a referenced assembly's identity.
pub struct AssemblyRefRow {
    /// 1-based row id
    pub rid: u32,
    /// Token of this row
    pub token: Token,
    /// Major version
    pub major_version: u16,
    /// Minor version
    pub minor_version: u16,
    /// Build number
    pub build_number: u16,
    /// Revision number
    pub revision_number: u16,
    /// Assembly flags
    pub flags: u32,
    /// `#Blob` offset of the public key or token
    pub public_key_or_token: u32,
    /// `#Strings` offset of the simple name
    pub name: u32,
    /// `#Strings` offset of the culture
    pub culture: u32,
    /// `#Blob` offset of the hash value
    pub hash_value: u32,
}

impl RowDefinition for AssemblyRefRow {
    #[rustfmt::skip]
    fn row_size(info: &TableInfoRef) -> u32 {
        u32::from(
            /* versions */            2 + 2 + 2 + 2 +
            /* flags */               4 +
            /* public_key_or_token */ info.blob_bytes() +
            /* name */                info.str_bytes() +
            /* culture */             info.str_bytes() +
            /* hash_value */          info.blob_bytes()
        )
    }

    fn read_row(data: &[u8], offset: &mut usize, rid: u32, info: &TableInfoRef) -> Result<Self> {
        Ok(AssemblyRefRow {
            rid,
            token: row_token!(TableId::AssemblyRef, rid),
            major_version: read_le_at::<u16>(data, offset)?,
            minor_version: read_le_at::<u16>(data, offset)?,
            build_number: read_le_at::<u16>(data, offset)?,
            revision_number: read_le_at::<u16>(data, offset)?,
            flags: read_le_at::<u32>(data, offset)?,
            public_key_or_token: read_le_at_dyn(data, offset, info.is_large_blob())?,
            name: read_le_at_dyn(data, offset, info.is_large_str())?,
            culture: read_le_at_dyn(data, offset, info.is_large_str())?,
            hash_value: read_le_at_dyn(data, offset, info.is_large_blob())?,
        })
    }
}

/// `AssemblyRefProcessor` legacy row.
pub struct AssemblyRefProcessorRow {
    /// 1-based row id
    pub rid: u32,
    /// Processor architecture id
    pub processor: u32,
    /// The `AssemblyRef` row this record belongs to
    pub assembly_ref: u32,
}

impl RowDefinition for AssemblyRefProcessorRow {
    #[rustfmt::skip]
    fn row_size(info: &TableInfoRef) -> u32 {
        u32::from(
            /* processor */    4u8 +
            /* assembly_ref */ info.table_index_bytes(TableId::AssemblyRef)
        )
    }

    fn read_row(data: &[u8], offset: &mut usize, rid: u32, info: &TableInfoRef) -> Result<Self> {
        Ok(AssemblyRefProcessorRow {
            rid,
            processor: read_le_at::<u32>(data, offset)?,
            assembly_ref: read_le_at_dyn(data, offset, info.is_large(TableId::AssemblyRef))?,
        })
    }
}

/// `AssemblyRefOs` legacy row.
pub struct AssemblyRefOsRow {
    /// 1-based row id
    pub rid: u32,
    /// Platform id
    pub platform_id: u32,
    /// OS major version
    pub major_version: u32,
    /// OS minor version
    pub minor_version: u32,
    /// The `AssemblyRef` row this record belongs to
    pub assembly_ref: u32,
}

impl RowDefinition for AssemblyRefOsRow {
    #[rustfmt::skip]
    fn row_size(info: &TableInfoRef) -> u32 {
        u32::from(
            /* platform + versions */ 4u8 + 4 + 4 +
            /* assembly_ref */        info.table_index_bytes(TableId::AssemblyRef)
        )
    }

    fn read_row(data: &[u8], offset: &mut usize, rid: u32, info: &TableInfoRef) -> Result<Self> {
        Ok(AssemblyRefOsRow {
            rid,
            platform_id: read_le_at::<u32>(data, offset)?,
            major_version: read_le_at::<u32>(data, offset)?,
            minor_version: read_le_at::<u32>(data, offset)?,
            assembly_ref: read_le_at_dyn(data, offset, info.is_large(TableId::AssemblyRef))?,
        })
    }
}

/// `File` table row.
pub struct FileRow {
    /// 1-based row id
    pub rid: u32,
    /// File attribute flags
    pub flags: u32,
    /// `#Strings` offset of the file name
    pub name: u32,
    /// `#Blob` offset of the file hash
    pub hash_value: u32,
}

impl RowDefinition for FileRow {
    #[rustfmt::skip]
    fn row_size(info: &TableInfoRef) -> u32 {
        u32::from(
            /* flags */      4u8 +
            /* name */       info.str_bytes() +
            /* hash_value */ info.blob_bytes()
        )
    }

    fn read_row(data: &[u8], offset: &mut usize, rid: u32, info: &TableInfoRef) -> Result<Self> {
        Ok(FileRow {
            rid,
            flags: read_le_at::<u32>(data, offset)?,
            name: read_le_at_dyn(data, offset, info.is_large_str())?,
            hash_value: read_le_at_dyn(data, offset, info.is_large_blob())?,
        })
    }
}

/// `ExportedType` table row.
pub struct ExportedTypeRow {
    /// 1-based row id
    pub rid: u32,
    /// Type attribute flags
    pub flags: u32,
    /// Hint: `TypeDef` row id in the implementing module
    pub typedef_id: u32,
    /// `#Strings` offset of the type name
    pub name: u32,
    /// `#Strings` offset of the namespace
    pub namespace: u32,
    /// Where the type is implemented
    pub implementation: CodedIndex,
}

impl RowDefinition for ExportedTypeRow {
    #[rustfmt::skip]
    fn row_size(info: &TableInfoRef) -> u32 {
        u32::from(
            /* flags */          4 +
            /* typedef_id */     4 +
            /* name */           info.str_bytes() +
            /* namespace */      info.str_bytes() +
            /* implementation */ info.coded_index_bytes(CodedIndexType::Implementation)
        )
    }

    fn read_row(data: &[u8], offset: &mut usize, rid: u32, info: &TableInfoRef) -> Result<Self> {
        Ok(ExportedTypeRow {
            rid,
            flags: read_le_at::<u32>(data, offset)?,
            typedef_id: read_le_at::<u32>(data, offset)?,
            name: read_le_at_dyn(data, offset, info.is_large_str())?,
            namespace: read_le_at_dyn(data, offset, info.is_large_str())?,
            implementation: CodedIndex::read(data, offset, info, CodedIndexType::Implementation)?,
        })
    }
}

/// `ManifestResource` table row.
pub struct ManifestResourceRow {
    /// 1-based row id
    pub rid: u32,
    /// Byte offset within the resource blob
    pub data_offset: u32,
    /// Resource attribute flags
    pub flags: u32,
    /// `#Strings` offset of the resource name
    pub name: u32,
    /// Where the resource lives (null = this module)
    pub implementation: CodedIndex,
}

impl RowDefinition for ManifestResourceRow {
    #[rustfmt::skip]
    fn row_size(info: &TableInfoRef) -> u32 {
        u32::from(
            /* data_offset */    4 +
            /* flags */          4 +
            /* name */           info.str_bytes() +
            /* implementation */ info.coded_index_bytes(CodedIndexType::Implementation)
        )
    }

    fn read_row(data: &[u8], offset: &mut usize, rid: u32, info: &TableInfoRef) -> Result<Self> {
        Ok(ManifestResourceRow {
            rid,
            data_offset: read_le_at::<u32>(data, offset)?,
            flags: read_le_at::<u32>(data, offset)?,
            name: read_le_at_dyn(data, offset, info.is_large_str())?,
            implementation: CodedIndex::read(data, offset, info, CodedIndexType::Implementation)?,
        })
    }
}

/// `NestedClass` table row.
pub struct NestedClassRow {
    /// 1-based row id
    pub rid: u32,
    /// The nested `TypeDef` row
    pub nested_class: u32,
    /// The enclosing `TypeDef` row
    pub enclosing_class: u32,
}

impl RowDefinition for NestedClassRow {
    #[rustfmt::skip]
    fn row_size(info: &TableInfoRef) -> u32 {
        u32::from(
            /* nested_class */    info.table_index_bytes(TableId::TypeDef) +
            /* enclosing_class */ info.table_index_bytes(TableId::TypeDef)
        )
    }

    fn read_row(data: &[u8], offset: &mut usize, rid: u32, info: &TableInfoRef) -> Result<Self> {
        Ok(NestedClassRow {
            rid,
            nested_class: read_le_at_dyn(data, offset, info.is_large(TableId::TypeDef))?,
            enclosing_class: read_le_at_dyn(data, offset, info.is_large(TableId::TypeDef))?,
        })
    }
}

/// `GenericParam` table row.
pub struct GenericParamRow {
    /// 1-based row id
    pub rid: u32,
    /// Token of this row
    pub token: Token,
    /// 0-based position within the owner's parameter list
    pub number: u16,
    /// Variance and constraint flags
    pub flags: u16,
    /// The owning type or method
    pub owner: CodedIndex,
    /// `#Strings` offset of the parameter name
    pub name: u32,
}

impl RowDefinition for GenericParamRow {
    #[rustfmt::skip]
    fn row_size(info: &TableInfoRef) -> u32 {
        u32::from(
            /* number */ 2 +
            /* flags */  2 +
            /* owner */  info.coded_index_bytes(CodedIndexType::TypeOrMethodDef) +
            /* name */   info.str_bytes()
        )
    }

    fn read_row(data: &[u8], offset: &mut usize, rid: u32, info: &TableInfoRef) -> Result<Self> {
        Ok(GenericParamRow {
            rid,
            token: row_token!(TableId::GenericParam, rid),
            number: read_le_at::<u16>(data, offset)?,
            flags: read_le_at::<u16>(data, offset)?,
            owner: CodedIndex::read(data, offset, info, CodedIndexType::TypeOrMethodDef)?,
            name: read_le_at_dyn(data, offset, info.is_large_str())?,
        })
    }
}

/// `MethodSpec` table row: a generic method instantiation.
pub struct MethodSpecRow {
    /// 1-based row id
    pub rid: u32,
    /// Token of this row
    pub token: Token,
    /// The instantiated generic method
    pub method: CodedIndex,
    /// `#Blob` offset of the instantiation signature
    pub instantiation: u32,
}

impl RowDefinition for MethodSpecRow {
    #[rustfmt::skip]
    fn row_size(info: &TableInfoRef) -> u32 {
        u32::from(
            /* method */        info.coded_index_bytes(CodedIndexType::MethodDefOrRef) +
            /* instantiation */ info.blob_bytes()
        )
    }

    fn read_row(data: &[u8], offset: &mut usize, rid: u32, info: &TableInfoRef) -> Result<Self> {
        Ok(MethodSpecRow {
            rid,
            token: row_token!(TableId::MethodSpec, rid),
            method: CodedIndex::read(data, offset, info, CodedIndexType::MethodDefOrRef)?,
            instantiation: read_le_at_dyn(data, offset, info.is_large_blob())?,
        })
    }
}

/// `GenericParamConstraint` table row.
pub struct GenericParamConstraintRow {
    /// 1-based row id
    pub rid: u32,
    /// The constrained `GenericParam` row
    pub owner: u32,
    /// The constraint type
    pub constraint: CodedIndex,
}

impl RowDefinition for GenericParamConstraintRow {
    #[rustfmt::skip]
    fn row_size(info: &TableInfoRef) -> u32 {
        u32::from(
            /* owner */      info.table_index_bytes(TableId::GenericParam) +
            /* constraint */ info.coded_index_bytes(CodedIndexType::TypeDefOrRef)
        )
    }

    fn read_row(data: &[u8], offset: &mut usize, rid: u32, info: &TableInfoRef) -> Result<Self> {
        Ok(GenericParamConstraintRow {
            rid,
            owner: read_le_at_dyn(data, offset, info.is_large(TableId::GenericParam))?,
            constraint: CodedIndex::read(data, offset, info, CodedIndexType::TypeDefOrRef)?,
        })
    }
}

/// Byte size of one row of table `id` under `info`'s widths.
///
/// The central width dispatch used when slicing the tables stream; EncLog
/// and EncMap reach the loader's own rejection path before this is called.
#[must_use]
pub fn row_size_of(id: TableId, info: &TableInfoRef) -> u32 {
    match id {
        TableId::Module => ModuleRow::row_size(info),
        TableId::TypeRef => TypeRefRow::row_size(info),
        TableId::TypeDef => TypeDefRow::row_size(info),
        TableId::FieldPtr => FieldPtrRow::row_size(info),
        TableId::Field => FieldRow::row_size(info),
        TableId::MethodPtr => MethodPtrRow::row_size(info),
        TableId::MethodDef => MethodDefRow::row_size(info),
        TableId::ParamPtr => ParamPtrRow::row_size(info),
        TableId::Param => ParamRow::row_size(info),
        TableId::InterfaceImpl => InterfaceImplRow::row_size(info),
        TableId::MemberRef => MemberRefRow::row_size(info),
        TableId::Constant => ConstantRow::row_size(info),
        TableId::CustomAttribute => CustomAttributeRow::row_size(info),
        TableId::FieldMarshal => FieldMarshalRow::row_size(info),
        TableId::DeclSecurity => DeclSecurityRow::row_size(info),
        TableId::ClassLayout => ClassLayoutRow::row_size(info),
        TableId::FieldLayout => FieldLayoutRow::row_size(info),
        TableId::StandAloneSig => StandAloneSigRow::row_size(info),
        TableId::EventMap => EventMapRow::row_size(info),
        TableId::EventPtr => EventPtrRow::row_size(info),
        TableId::Event => EventRow::row_size(info),
        TableId::PropertyMap => PropertyMapRow::row_size(info),
        TableId::PropertyPtr => PropertyPtrRow::row_size(info),
        TableId::Property => PropertyRow::row_size(info),
        TableId::MethodSemantics => MethodSemanticsRow::row_size(info),
        TableId::MethodImpl => MethodImplRow::row_size(info),
        TableId::ModuleRef => ModuleRefRow::row_size(info),
        TableId::TypeSpec => TypeSpecRow::row_size(info),
        TableId::ImplMap => ImplMapRow::row_size(info),
        TableId::FieldRva => FieldRvaRow::row_size(info),
        TableId::EncLog | TableId::EncMap => 0,
        TableId::Assembly => AssemblyRow::row_size(info),
        TableId::AssemblyProcessor => AssemblyProcessorRow::row_size(info),
        TableId::AssemblyOs => AssemblyOsRow::row_size(info),
        TableId::AssemblyRef => AssemblyRefRow::row_size(info),
        TableId::AssemblyRefProcessor => AssemblyRefProcessorRow::row_size(info),
        TableId::AssemblyRefOs => AssemblyRefOsRow::row_size(info),
        TableId::File => FileRow::row_size(info),
        TableId::ExportedType => ExportedTypeRow::row_size(info),
        TableId::ManifestResource => ManifestResourceRow::row_size(info),
        TableId::NestedClass => NestedClassRow::row_size(info),
        TableId::GenericParam => GenericParamRow::row_size(info),
        TableId::MethodSpec => MethodSpecRow::row_size(info),
        TableId::GenericParamConstraint => GenericParamConstraintRow::row_size(info),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::metadata::tables::{MetadataTable, TableInfo};

    fn small_info() -> TableInfoRef {
        Arc::new(TableInfo::new_test(
            &[
                (TableId::TypeDef, 4),
                (TableId::Field, 4),
                (TableId::MethodDef, 4),
                (TableId::Param, 4),
            ],
            false,
            false,
            false,
        ))
    }

    #[test]
    fn typedef_crafted_short() {
        let data = vec![
            0x01, 0x01, 0x01, 0x01, // flags
            0x02, 0x02, // name
            0x03, 0x03, // namespace
            0x04, 0x00, // extends (tag 0 = TypeDef, row 1)
            0x05, 0x00, // field_list
            0x06, 0x00, // method_list
        ];

        let table = MetadataTable::<TypeDefRow>::new(&data, 1, small_info()).unwrap();
        let row = table.get(1).unwrap();
        assert_eq!(row.token.value(), 0x0200_0001);
        assert_eq!(row.flags, 0x0101_0101);
        assert_eq!(row.name, 0x0202);
        assert_eq!(row.namespace, 0x0303);
        assert_eq!(row.extends.tag, TableId::TypeDef);
        assert_eq!(row.extends.row, 1);
        assert_eq!(row.field_list, 5);
        assert_eq!(row.method_list, 6);
    }

    #[test]
    fn typedef_crafted_long() {
        // A huge TypeSpec table widens the TypeDefOrRef coded index even
        // though extends still points into TypeDef.
        let info = Arc::new(TableInfo::new_test(
            &[
                (TableId::TypeDef, 1),
                (TableId::TypeSpec, 0x4000),
                (TableId::Field, 1),
                (TableId::MethodDef, 1),
            ],
            true,
            true,
            true,
        ));
        let data = vec![
            0x01, 0x01, 0x01, 0x01, // flags
            0x02, 0x02, 0x02, 0x02, // name (wide)
            0x03, 0x03, 0x03, 0x03, // namespace (wide)
            0x04, 0x00, 0x00, 0x00, // extends (wide)
            0x05, 0x00, // field_list
            0x06, 0x00, // method_list
        ];

        assert_eq!(TypeDefRow::row_size(&info) as usize, data.len());
        let table = MetadataTable::<TypeDefRow>::new(&data, 1, info).unwrap();
        let row = table.get(1).unwrap();
        assert_eq!(row.name, 0x0202_0202);
        assert_eq!(row.extends.row, 1);
    }

    #[test]
    fn constant_skips_padding_byte() {
        let data = vec![
            0x08, 0x00, // base_type (I4) + pad
            0x04, 0x00, // parent: tag 0 (Field), row 1
            0x07, 0x00, // value
        ];
        let table = MetadataTable::<ConstantRow>::new(&data, 1, small_info()).unwrap();
        let row = table.get(1).unwrap();
        assert_eq!(row.base_type, 0x08);
        assert_eq!(row.parent.tag, TableId::Field);
        assert_eq!(row.value, 7);
    }

    #[test]
    fn every_row_size_consumes_exactly_its_width() {
        use strum::IntoEnumIterator;
        let info = small_info();
        for id in TableId::iter() {
            if matches!(id, TableId::EncLog | TableId::EncMap) {
                continue;
            }
            let size = row_size_of(id, &info);
            assert!(size > 0, "{id:?} has zero width");
        }
    }
}
