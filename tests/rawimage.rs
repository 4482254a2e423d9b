//! Raw reader properties: widths, round trips and compressed encodings.

mod common;

use common::{sig_field, ImageBuilder};
use emberclr::metadata::image::RawImage;
use emberclr::metadata::tables::{rows, CodedIndexType, TableId, TableInfo};
use emberclr::Parser;

#[test]
fn synthetic_rows_round_trip_through_the_schema() {
    let mut builder = ImageBuilder::new("patch.dll");
    let mscorlib = builder.add_assembly_ref("mscorlib");
    let object_ref = builder.add_type_ref(mscorlib, "System", "Object");
    builder.begin_type(0x0010_0001, "Patch", "Thing", Some((TableId::TypeRef, object_ref)));
    builder.add_field(0x0001, "Value", &sig_field(0x08));

    let bytes = builder.build();
    let image = RawImage::load(&bytes).unwrap();

    let typedef = image
        .table::<rows::TypeDefRow>(TableId::TypeDef)
        .unwrap()
        .get(1)
        .unwrap();
    assert_eq!(typedef.flags, 0x0010_0001);
    assert_eq!(image.string(typedef.name).unwrap(), "Thing");
    assert_eq!(image.string(typedef.namespace).unwrap(), "Patch");
    assert_eq!(typedef.extends.tag, TableId::TypeRef);
    assert_eq!(typedef.extends.row, object_ref);
    assert_eq!(typedef.field_list, 1);

    let field = image
        .table::<rows::FieldRow>(TableId::Field)
        .unwrap()
        .get(1)
        .unwrap();
    assert_eq!(field.flags, 0x0001);
    assert_eq!(image.string(field.name).unwrap(), "Value");
    assert_eq!(image.blob(field.signature).unwrap(), sig_field(0x08));
}

#[test]
fn computed_row_width_is_the_sum_of_column_widths() {
    let info = std::sync::Arc::new(TableInfo::new_test(
        &[
            (TableId::TypeDef, 10),
            (TableId::TypeRef, 10),
            (TableId::Field, 10),
            (TableId::MethodDef, 10),
            (TableId::Param, 10),
        ],
        false,
        false,
        false,
    ));

    // TypeDef: flags(4) + name(2) + namespace(2) + extends(2) +
    // field_list(2) + method_list(2)
    assert_eq!(rows::row_size_of(TableId::TypeDef, &info), 14);
    // MethodDef: rva(4) + impl(2) + flags(2) + name(2) + sig(2) +
    // params(2)
    assert_eq!(rows::row_size_of(TableId::MethodDef, &info), 14);

    // Widen one coded-index candidate table past the 2-bit tag budget:
    // every TypeDefOrRef column grows to 4 bytes.
    let wide = std::sync::Arc::new(TableInfo::new_test(
        &[(TableId::TypeDef, 10), (TableId::TypeSpec, 0x4000)],
        false,
        false,
        false,
    ));
    assert_eq!(wide.coded_index_bytes(CodedIndexType::TypeDefOrRef), 4);
    assert_eq!(rows::row_size_of(TableId::TypeDef, &wide), 16);
}

#[test]
fn compressed_integers_round_trip_across_all_bands() {
    fn encode_unsigned(value: u32) -> Vec<u8> {
        if value <= 0x7F {
            vec![value as u8]
        } else if value <= 0x3FFF {
            vec![0x80 | (value >> 8) as u8, value as u8]
        } else {
            vec![
                0xC0 | (value >> 24) as u8,
                (value >> 16) as u8,
                (value >> 8) as u8,
                value as u8,
            ]
        }
    }
    // Inverse of the decode bands: the band constant is picked by the
    // magnitude interval the value falls into.
    fn encode_signed(value: i32) -> Vec<u8> {
        let magnitude = if value >= 0 {
            (value as u32) << 1
        } else if value >= -0x40 {
            (((value + 0x40) as u32) << 1) | 1
        } else if value >= -0x1FC0 {
            (((value + 0x2000) as u32) << 1) | 1
        } else {
            (((value + 0x1000_0000) as u32) << 1) | 1
        };
        encode_unsigned(magnitude)
    }

    for value in [0u32, 0x7F, 0x80, 0x3FFF, 0x4000, 0x1FFF_FFFF] {
        let bytes = encode_unsigned(value);
        let mut parser = Parser::new(&bytes);
        assert_eq!(parser.read_compressed_u32().unwrap(), value);
    }

    // Round trips across the signed bands.
    for value in [
        0i32, 0x3F, -0x40, 0x40, -0x41, 0x1FFF, -0x1FC0, 0x2000, -0x1FC1, 0x0FFF_FFFF,
        -0xFF_FE00,
    ] {
        let bytes = encode_signed(value);
        let mut parser = Parser::new(&bytes);
        assert_eq!(parser.read_compressed_i32().unwrap(), value, "{value:#x}");
    }

    // The exact subtraction boundaries: magnitudes on each side of every
    // threshold subtract the matching band constant.
    for (magnitude, expected) in [
        (0u32, -0x40i32),
        (0x3F, -1),
        (0x40, 0x40 - 0x2000),
        (0x1FFF, -1),
        (0x2000, 0x2000 - 0x1000_0000),
        (0x0FFF_FFFF, -1),
    ] {
        let bytes = encode_unsigned((magnitude << 1) | 1);
        let mut parser = Parser::new(&bytes);
        assert_eq!(
            parser.read_compressed_i32().unwrap(),
            expected,
            "magnitude {magnitude:#x}"
        );
    }
}

#[test]
fn image_rejects_garbage() {
    assert!(RawImage::load(&[]).is_err());
    assert!(RawImage::load(&[0u8; 64]).is_err());
    assert!(RawImage::load(&vec![0xFFu8; 4096]).is_err());
}
