use std::hint::black_box;

use criterion::{criterion_group, criterion_main, Criterion};
use emberclr::Parser;

fn compressed_integers(c: &mut Criterion) {
    // A mix of all three widths, as signature blobs contain in practice.
    let mut data = Vec::new();
    for index in 0u32..4096 {
        let value = match index % 3 {
            0 => index % 0x80,
            1 => 0x80 + index % 0x3F00,
            _ => 0x4000 + index,
        };
        if value <= 0x7F {
            data.push(value as u8);
        } else if value <= 0x3FFF {
            data.extend_from_slice(&[0x80 | (value >> 8) as u8, value as u8]);
        } else {
            data.extend_from_slice(&[
                0xC0 | (value >> 24) as u8,
                (value >> 16) as u8,
                (value >> 8) as u8,
                value as u8,
            ]);
        }
    }

    c.bench_function("compressed_u32_stream", |b| {
        b.iter(|| {
            let mut parser = Parser::new(black_box(&data));
            let mut total = 0u64;
            while parser.has_more_data() {
                total += u64::from(parser.read_compressed_u32().unwrap());
            }
            total
        })
    });
}

criterion_group!(benches, compressed_integers);
criterion_main!(benches);
