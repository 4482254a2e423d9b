//! Shared integration-test fixtures: a synthetic module-image writer and
//! a miniature AOT corelib.
//!
//! The writer emits the same container layout the loader parses: DOS stub,
//! PE headers, one `.text` section holding the runtime header, method
//! bodies and the metadata root with its five streams. Index widths are
//! computed from the final row counts through the crate's own `TableInfo`,
//! so the write->read round trip exercises the real width rules.

#![allow(dead_code)]

use std::sync::Arc;

use emberclr::metadata::tables::{CodedIndexType, TableId, TableInfo};
use emberclr::metadata::typesystem::{
    AotMethodSpec, AotTypeSpec, MethodAttributes, MethodSig, ParamAttributes, ParamSig, Ty,
    TypeAttributes, TypeHandle, TypeUniverse,
};

const TEXT_RVA: u32 = 0x2000;
const TEXT_FILE_OFFSET: u32 = 0x200;
const LFANEW: u32 = 0x80;

/// One serialized column value; widths are resolved at build time.
#[derive(Clone)]
pub enum Col {
    /// Fixed-width integer (value, byte width)
    Fixed(u64, u8),
    /// `#Strings` offset
    Str(u32),
    /// `#Blob` offset
    Blob(u32),
    /// `#GUID` index
    Guid(u32),
    /// Plain table index
    Table(TableId, u32),
    /// Coded index (family, target table, row)
    Coded(CodedIndexType, TableId, u32),
}

/// Builds a loadable synthetic module image.
pub struct ImageBuilder {
    strings: Vec<u8>,
    blobs: Vec<u8>,
    user_strings: Vec<u8>,
    guids: Vec<u8>,
    rows: Vec<Vec<Vec<Col>>>,
    bodies: Vec<u8>,
    entry_point: u32,
}

impl ImageBuilder {
    pub fn new(module_name: &str) -> ImageBuilder {
        let mut builder = ImageBuilder {
            strings: vec![0],
            blobs: vec![0],
            user_strings: vec![0],
            guids: vec![0; 16],
            rows: vec![Vec::new(); usize::from(TableId::MAX) + 1],
            bodies: Vec::new(),
            entry_point: 0,
        };
        let name = builder.str_(module_name);
        builder.push_row(
            TableId::Module,
            vec![
                Col::Fixed(0, 2),
                Col::Str(name),
                Col::Guid(1),
                Col::Guid(0),
                Col::Guid(0),
            ],
        );
        builder
    }

    pub fn str_(&mut self, value: &str) -> u32 {
        let offset = self.strings.len() as u32;
        self.strings.extend_from_slice(value.as_bytes());
        self.strings.push(0);
        offset
    }

    pub fn blob(&mut self, value: &[u8]) -> u32 {
        let offset = self.blobs.len() as u32;
        assert!(value.len() < 0x80, "test blobs stay in the 1-byte band");
        self.blobs.push(value.len() as u8);
        self.blobs.extend_from_slice(value);
        offset
    }

    /// Add a `#US` literal; returns the `ldstr` token.
    pub fn user_string(&mut self, value: &str) -> u32 {
        let offset = self.user_strings.len() as u32;
        let units: Vec<u16> = value.encode_utf16().collect();
        let byte_len = units.len() * 2 + 1;
        assert!(byte_len < 0x80);
        self.user_strings.push(byte_len as u8);
        for unit in units {
            self.user_strings.extend_from_slice(&unit.to_le_bytes());
        }
        self.user_strings.push(0);
        0x7000_0000 | offset
    }

    fn push_row(&mut self, table: TableId, row: Vec<Col>) -> u32 {
        let rows = &mut self.rows[table as usize];
        rows.push(row);
        rows.len() as u32
    }

    fn next_row(&self, table: TableId) -> u32 {
        self.rows[table as usize].len() as u32 + 1
    }

    /// Place a method body in the `.text` section; returns its RVA.
    pub fn add_method_body(&mut self, body: &[u8]) -> u32 {
        while self.bodies.len() % 4 != 0 {
            self.bodies.push(0);
        }
        // Bodies start after the 72-byte runtime header.
        let rva = TEXT_RVA + 72 + self.bodies.len() as u32;
        self.bodies.extend_from_slice(body);
        rva
    }

    pub fn add_assembly(&mut self, name: &str) {
        let name = self.str_(name);
        self.push_row(
            TableId::Assembly,
            vec![
                Col::Fixed(0x8004, 4), // SHA1
                Col::Fixed(1, 2),
                Col::Fixed(0, 2),
                Col::Fixed(0, 2),
                Col::Fixed(0, 2),
                Col::Fixed(0, 4),
                Col::Blob(0),
                Col::Str(name),
                Col::Str(0),
            ],
        );
    }

    pub fn add_assembly_ref(&mut self, name: &str) -> u32 {
        let name = self.str_(name);
        self.push_row(
            TableId::AssemblyRef,
            vec![
                Col::Fixed(4, 2),
                Col::Fixed(0, 2),
                Col::Fixed(0, 2),
                Col::Fixed(0, 2),
                Col::Fixed(0, 4),
                Col::Blob(0),
                Col::Str(name),
                Col::Str(0),
                Col::Blob(0),
            ],
        );
        self.rows[TableId::AssemblyRef as usize].len() as u32
    }

    pub fn add_type_ref(&mut self, assembly_ref: u32, namespace: &str, name: &str) -> u32 {
        let name = self.str_(name);
        let namespace = self.str_(namespace);
        self.push_row(
            TableId::TypeRef,
            vec![
                Col::Coded(CodedIndexType::ResolutionScope, TableId::AssemblyRef, assembly_ref),
                Col::Str(name),
                Col::Str(namespace),
            ],
        )
    }

    /// Begin a type; fields/methods added afterwards belong to it until
    /// the next `begin_type`.
    pub fn begin_type(
        &mut self,
        flags: u32,
        namespace: &str,
        name: &str,
        extends: Option<(TableId, u32)>,
    ) -> u32 {
        let name = self.str_(name);
        let namespace = self.str_(namespace);
        let field_list = self.next_row(TableId::Field);
        let method_list = self.next_row(TableId::MethodDef);
        let (extend_table, extend_row) = extends.unwrap_or((TableId::TypeDef, 0));
        self.push_row(
            TableId::TypeDef,
            vec![
                Col::Fixed(u64::from(flags), 4),
                Col::Str(name),
                Col::Str(namespace),
                Col::Coded(CodedIndexType::TypeDefOrRef, extend_table, extend_row),
                Col::Table(TableId::Field, field_list),
                Col::Table(TableId::MethodDef, method_list),
            ],
        )
    }

    pub fn add_field(&mut self, flags: u16, name: &str, signature: &[u8]) -> u32 {
        let name = self.str_(name);
        let signature = self.blob(signature);
        self.push_row(
            TableId::Field,
            vec![
                Col::Fixed(u64::from(flags), 2),
                Col::Str(name),
                Col::Blob(signature),
            ],
        )
    }

    pub fn add_method(
        &mut self,
        rva: u32,
        impl_flags: u16,
        flags: u16,
        name: &str,
        signature: &[u8],
    ) -> u32 {
        let name = self.str_(name);
        let signature = self.blob(signature);
        let param_list = self.next_row(TableId::Param);
        self.push_row(
            TableId::MethodDef,
            vec![
                Col::Fixed(u64::from(rva), 4),
                Col::Fixed(u64::from(impl_flags), 2),
                Col::Fixed(u64::from(flags), 2),
                Col::Str(name),
                Col::Blob(signature),
                Col::Table(TableId::Param, param_list),
            ],
        )
    }

    pub fn add_param(&mut self, flags: u16, sequence: u16, name: &str) -> u32 {
        let name = self.str_(name);
        self.push_row(
            TableId::Param,
            vec![
                Col::Fixed(u64::from(flags), 2),
                Col::Fixed(u64::from(sequence), 2),
                Col::Str(name),
            ],
        )
    }

    pub fn add_interface_impl(&mut self, class: u32, interface: (TableId, u32)) -> u32 {
        self.push_row(
            TableId::InterfaceImpl,
            vec![
                Col::Table(TableId::TypeDef, class),
                Col::Coded(CodedIndexType::TypeDefOrRef, interface.0, interface.1),
            ],
        )
    }

    pub fn add_nested_class(&mut self, nested: u32, enclosing: u32) -> u32 {
        self.push_row(
            TableId::NestedClass,
            vec![
                Col::Table(TableId::TypeDef, nested),
                Col::Table(TableId::TypeDef, enclosing),
            ],
        )
    }

    pub fn add_member_ref(&mut self, class: (TableId, u32), name: &str, signature: &[u8]) -> u32 {
        let name = self.str_(name);
        let signature = self.blob(signature);
        self.push_row(
            TableId::MemberRef,
            vec![
                Col::Coded(CodedIndexType::MemberRefParent, class.0, class.1),
                Col::Str(name),
                Col::Blob(signature),
            ],
        )
    }

    pub fn add_custom_attribute(
        &mut self,
        parent: (TableId, u32),
        ctor: (TableId, u32),
        value: &[u8],
    ) -> u32 {
        let value = if value.is_empty() { 0 } else { self.blob(value) };
        self.push_row(
            TableId::CustomAttribute,
            vec![
                Col::Coded(CodedIndexType::HasCustomAttribute, parent.0, parent.1),
                Col::Coded(CodedIndexType::CustomAttributeType, ctor.0, ctor.1),
                Col::Blob(value),
            ],
        )
    }

    pub fn add_constant(&mut self, base_type: u8, parent: (TableId, u32), value: &[u8]) -> u32 {
        let value = self.blob(value);
        self.push_row(
            TableId::Constant,
            vec![
                Col::Fixed(u64::from(base_type), 2),
                Col::Coded(CodedIndexType::HasConstant, parent.0, parent.1),
                Col::Blob(value),
            ],
        )
    }

    pub fn add_class_layout(&mut self, packing: u16, size: u32, parent: u32) -> u32 {
        self.push_row(
            TableId::ClassLayout,
            vec![
                Col::Fixed(u64::from(packing), 2),
                Col::Fixed(u64::from(size), 4),
                Col::Table(TableId::TypeDef, parent),
            ],
        )
    }

    pub fn add_field_layout(&mut self, offset: u32, field: u32) -> u32 {
        self.push_row(
            TableId::FieldLayout,
            vec![
                Col::Fixed(u64::from(offset), 4),
                Col::Table(TableId::Field, field),
            ],
        )
    }

    pub fn add_stand_alone_sig(&mut self, signature: &[u8]) -> u32 {
        let signature = self.blob(signature);
        self.push_row(TableId::StandAloneSig, vec![Col::Blob(signature)])
    }

    pub fn set_entry_point(&mut self, method_row: u32) {
        self.entry_point = 0x0600_0000 | method_row;
    }

    /// Assemble the final image.
    pub fn build(self) -> Vec<u8> {
        let counts: Vec<(TableId, u32)> = (0..=TableId::MAX)
            .filter_map(TableId::from_number)
            .filter(|id| !self.rows[*id as usize].is_empty())
            .map(|id| (id, self.rows[id as usize].len() as u32))
            .collect();
        let info = Arc::new(TableInfo::new_test(&counts, false, false, false));

        // Serialize the #~ stream.
        let mut tables = Vec::new();
        tables.extend_from_slice(&0u32.to_le_bytes()); // reserved
        tables.push(2); // major
        tables.push(0); // minor
        tables.push(0); // heap size flags
        tables.push(1); // reserved
        let mut valid = 0u64;
        for (id, _) in &counts {
            valid |= 1 << (*id as u8);
        }
        tables.extend_from_slice(&valid.to_le_bytes());
        tables.extend_from_slice(&valid.to_le_bytes()); // sorted (unchecked)
        for (_, count) in &counts {
            tables.extend_from_slice(&count.to_le_bytes());
        }
        for (id, _) in &counts {
            for row in &self.rows[*id as usize] {
                for col in row {
                    serialize_col(&mut tables, col, &info);
                }
            }
        }

        // Heaps, padded to 4.
        let pad4 = |v: &mut Vec<u8>| {
            while v.len() % 4 != 0 {
                v.push(0);
            }
        };
        let mut strings = self.strings;
        pad4(&mut strings);
        let mut us = self.user_strings;
        pad4(&mut us);
        let mut blobs = self.blobs;
        pad4(&mut blobs);
        let guids = self.guids;
        pad4(&mut tables);

        // Metadata root.
        let version = b"v4.0.30319\0\0";
        let mut root = Vec::new();
        root.extend_from_slice(&0x424A_5342u32.to_le_bytes());
        root.extend_from_slice(&1u16.to_le_bytes());
        root.extend_from_slice(&1u16.to_le_bytes());
        root.extend_from_slice(&0u32.to_le_bytes());
        root.extend_from_slice(&(version.len() as u32).to_le_bytes());
        root.extend_from_slice(version);
        root.extend_from_slice(&0u16.to_le_bytes()); // flags
        root.extend_from_slice(&5u16.to_le_bytes()); // stream count

        // Stream headers: (offset, size, padded name).
        // The tables stream sits last so truncation tests can cut into
        // it without disturbing the heaps.
        let header_len = |name: &str| 8 + (name.len() / 4 + 1) * 4;
        let headers_size: usize = ["#Strings", "#US", "#GUID", "#Blob", "#~"]
            .iter()
            .map(|name| header_len(name))
            .sum();
        let mut stream_offset = root.len() + headers_size;
        let streams: [(&str, &[u8]); 5] = [
            ("#Strings", &strings),
            ("#US", &us),
            ("#GUID", &guids),
            ("#Blob", &blobs),
            ("#~", &tables),
        ];
        let mut headers = Vec::new();
        for (name, data) in &streams {
            headers.extend_from_slice(&(stream_offset as u32).to_le_bytes());
            headers.extend_from_slice(&(data.len() as u32).to_le_bytes());
            headers.extend_from_slice(name.as_bytes());
            headers.push(0);
            while headers.len() % 4 != 0 {
                headers.push(0);
            }
            stream_offset += data.len();
        }
        root.extend_from_slice(&headers);
        for (_, data) in &streams {
            root.extend_from_slice(data);
        }
        let metadata_size = root.len() as u32;

        // Section content: runtime header, bodies, metadata root.
        let mut section = Vec::new();
        let meta_offset_in_section = 72 + self.bodies.len() + pad_to4(self.bodies.len());
        section.extend_from_slice(&72u32.to_le_bytes());
        section.extend_from_slice(&2u16.to_le_bytes());
        section.extend_from_slice(&5u16.to_le_bytes());
        section.extend_from_slice(&(TEXT_RVA + meta_offset_in_section as u32).to_le_bytes());
        section.extend_from_slice(&metadata_size.to_le_bytes());
        section.extend_from_slice(&1u32.to_le_bytes()); // flags: IL only
        section.extend_from_slice(&self.entry_point.to_le_bytes());
        section.resize(72, 0);
        section.extend_from_slice(&self.bodies);
        while section.len() % 4 != 0 {
            section.push(0);
        }
        section.extend_from_slice(&root);

        // Container headers.
        let mut image = vec![0u8; TEXT_FILE_OFFSET as usize];
        image[0] = b'M';
        image[1] = b'Z';
        image[0x3C..0x40].copy_from_slice(&LFANEW.to_le_bytes());

        let pe = LFANEW as usize;
        image[pe..pe + 4].copy_from_slice(&0x0000_4550u32.to_le_bytes());
        let coff = pe + 4;
        image[coff..coff + 2].copy_from_slice(&0x014Cu16.to_le_bytes());
        image[coff + 2..coff + 4].copy_from_slice(&1u16.to_le_bytes()); // sections
        image[coff + 16..coff + 18].copy_from_slice(&224u16.to_le_bytes());
        image[coff + 18..coff + 20].copy_from_slice(&0x2102u16.to_le_bytes());

        let opt = coff + 20;
        image[opt..opt + 2].copy_from_slice(&0x010Bu16.to_le_bytes()); // PE32 magic
        // Runtime header directory entry at opt + 208.
        image[opt + 208..opt + 212].copy_from_slice(&TEXT_RVA.to_le_bytes());
        image[opt + 212..opt + 216].copy_from_slice(&72u32.to_le_bytes());

        let sect = opt + 224;
        image[sect..sect + 6].copy_from_slice(b".text\0");
        image[sect + 8..sect + 12].copy_from_slice(&(section.len() as u32).to_le_bytes());
        image[sect + 12..sect + 16].copy_from_slice(&TEXT_RVA.to_le_bytes());
        image[sect + 16..sect + 20].copy_from_slice(&(section.len() as u32).to_le_bytes());
        image[sect + 20..sect + 24].copy_from_slice(&TEXT_FILE_OFFSET.to_le_bytes());

        image.extend_from_slice(&section);
        image
    }
}

fn pad_to4(len: usize) -> usize {
    (4 - len % 4) % 4
}

fn serialize_col(out: &mut Vec<u8>, col: &Col, info: &Arc<TableInfo>) {
    match col {
        Col::Fixed(value, width) => {
            out.extend_from_slice(&value.to_le_bytes()[..usize::from(*width)]);
        }
        Col::Str(offset) => write_index(out, *offset, info.str_bytes()),
        Col::Blob(offset) => write_index(out, *offset, info.blob_bytes()),
        Col::Guid(index) => write_index(out, *index, info.guid_bytes()),
        Col::Table(table, row) => write_index(out, *row, info.table_index_bytes(*table)),
        Col::Coded(family, table, row) => {
            let tables = family.tables();
            let tag = tables
                .iter()
                .position(|candidate| candidate == table)
                .expect("target table not in coded family") as u32;
            let encoded = (row << family.tag_bits()) | tag;
            write_index(out, encoded, info.coded_index_bytes(*family));
        }
    }
}

fn write_index(out: &mut Vec<u8>, value: u32, width: u8) {
    if width == 4 {
        out.extend_from_slice(&value.to_le_bytes());
    } else {
        assert!(value <= u32::from(u16::MAX), "index overflows test width");
        out.extend_from_slice(&(value as u16).to_le_bytes());
    }
}

// ---- signature blob helpers --------------------------------------------

/// `instance void ()`
pub fn sig_instance_void() -> Vec<u8> {
    vec![0x20, 0x00, 0x01]
}

/// `static void ()`
pub fn sig_static_void() -> Vec<u8> {
    vec![0x00, 0x00, 0x01]
}

/// `static int32 ()`
pub fn sig_static_i4() -> Vec<u8> {
    vec![0x00, 0x00, 0x08]
}

/// Field signature over one element type byte.
pub fn sig_field(element: u8) -> Vec<u8> {
    vec![0x06, element]
}

/// A tiny-format body wrapping `code`.
pub fn tiny_body(code: &[u8]) -> Vec<u8> {
    assert!(code.len() < 64);
    let mut body = vec![(code.len() as u8) << 2 | 0x2];
    body.extend_from_slice(code);
    body
}

/// A fat-format body with one exception clause.
pub fn fat_body_with_catch(
    code: &[u8],
    max_stack: u16,
    try_offset: u16,
    try_len: u8,
    handler_offset: u16,
    handler_len: u8,
    catch_token: u32,
) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(&0x301Bu16.to_le_bytes()); // fat | more_sects | init_locals, size 3
    body.extend_from_slice(&max_stack.to_le_bytes());
    body.extend_from_slice(&(code.len() as u32).to_le_bytes());
    body.extend_from_slice(&0u32.to_le_bytes()); // no locals
    body.extend_from_slice(code);
    while body.len() % 4 != 0 {
        body.push(0);
    }
    body.push(0x01); // EH table, small
    body.push(16); // data size: 4 + 12
    body.extend_from_slice(&0u16.to_le_bytes());
    body.extend_from_slice(&0u16.to_le_bytes()); // flags: exception
    body.extend_from_slice(&try_offset.to_le_bytes());
    body.push(try_len);
    body.extend_from_slice(&handler_offset.to_le_bytes());
    body.push(handler_len);
    body.extend_from_slice(&catch_token.to_le_bytes());
    body
}

// ---- miniature AOT corelib ---------------------------------------------

/// Handles of the corelib types integration tests wire against.
pub struct Corelib {
    pub universe: Arc<TypeUniverse>,
    pub object: TypeHandle,
    pub value_type: TypeHandle,
    pub enum_type: TypeHandle,
    pub string: TypeHandle,
}

fn instance_sig(ret: Ty, params: &[Ty]) -> MethodSig {
    MethodSig {
        has_this: true,
        call_conv: 0x20,
        generic_param_count: 0,
        ret: ret.shared(),
        params: params
            .iter()
            .map(|param| ParamSig {
                ty: param.clone().shared(),
                attrs: ParamAttributes::empty(),
                name: None,
            })
            .collect(),
    }
}

/// Build the AOT side every integration test loads modules against.
pub fn corelib() -> Corelib {
    let builder = TypeUniverse::builder().assembly("mscorlib");

    let virt = MethodAttributes::VIRTUAL | MethodAttributes::NEW_SLOT;
    let object = builder
        .add_type(
            "mscorlib",
            AotTypeSpec {
                slot_count: 4,
                methods: vec![
                    AotMethodSpec {
                        name: "ToString".to_string(),
                        flags: virt,
                        sig: instance_sig(Ty::String, &[]),
                        slot: Some(0),
                    },
                    AotMethodSpec {
                        name: "Equals".to_string(),
                        flags: virt,
                        sig: instance_sig(Ty::Bool, &[Ty::Object]),
                        slot: Some(1),
                    },
                    AotMethodSpec {
                        name: "GetHashCode".to_string(),
                        flags: virt,
                        sig: instance_sig(Ty::I4, &[]),
                        slot: Some(2),
                    },
                    AotMethodSpec {
                        name: "Finalize".to_string(),
                        flags: virt,
                        sig: instance_sig(Ty::Void, &[]),
                        slot: Some(3),
                    },
                ],
                ..AotTypeSpec::class("System", "Object")
            },
        )
        .unwrap();
    let object_ty = object.byval_ty();

    let value_type = builder
        .add_type(
            "mscorlib",
            AotTypeSpec {
                flags: TypeAttributes::ABSTRACT,
                parent: Some(object_ty.clone()),
                ..AotTypeSpec::class("System", "ValueType")
            },
        )
        .unwrap();
    let enum_type = builder
        .add_type(
            "mscorlib",
            AotTypeSpec {
                flags: TypeAttributes::ABSTRACT,
                parent: Some(value_type.byval_ty()),
                ..AotTypeSpec::class("System", "Enum")
            },
        )
        .unwrap();
    let string = builder
        .add_type(
            "mscorlib",
            AotTypeSpec {
                flags: TypeAttributes::SEALED,
                parent: Some(object_ty.clone()),
                ..AotTypeSpec::class("System", "String")
            },
        )
        .unwrap();
    let attribute = builder
        .add_type(
            "mscorlib",
            AotTypeSpec {
                flags: TypeAttributes::ABSTRACT,
                parent: Some(object_ty.clone()),
                ..AotTypeSpec::class("System", "Attribute")
            },
        )
        .unwrap();
    for (namespace, name) in [
        ("System", "ThreadStaticAttribute"),
        ("System", "ObsoleteAttribute"),
        ("System.Runtime.InteropServices", "InAttribute"),
        ("System.Runtime.InteropServices", "OutAttribute"),
    ] {
        let ctor_params: Vec<Ty> = if name == "ObsoleteAttribute" {
            vec![Ty::String]
        } else {
            Vec::new()
        };
        builder
            .add_type(
                "mscorlib",
                AotTypeSpec {
                    flags: TypeAttributes::SEALED,
                    parent: Some(attribute.byval_ty()),
                    methods: vec![AotMethodSpec {
                        name: ".ctor".to_string(),
                        flags: MethodAttributes::SPECIAL_NAME,
                        sig: instance_sig(Ty::Void, &ctor_params),
                        slot: None,
                    }],
                    ..AotTypeSpec::class(namespace, name)
                },
            )
            .unwrap();
    }

    Corelib {
        universe: builder.finish(),
        object,
        value_type,
        enum_type,
        string,
    }
}
