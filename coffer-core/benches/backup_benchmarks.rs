/*!
Benchmarks for the hot paths of backup creation: the checksummed copy
loop and manifest parsing.
*/

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use tempfile::TempDir;

use coffer_core::copier::copy_checksummed;
use coffer_core::storage::{LocalStorage, StorageAdapter};
use coffer_core::BackupMeta;

fn bench_checksummed_copy(c: &mut Criterion) {
    let temp_dir = TempDir::new().unwrap();
    let storage = LocalStorage::new();

    let mut group = c.benchmark_group("checksummed_copy");
    for size in [64 * 1024_u64, 1 << 20, 4 << 20] {
        let src = temp_dir.path().join(format!("{size}.sst"));
        storage.write(&src, &vec![0xA5u8; size as usize]).unwrap();
        let dst = temp_dir.path().join(format!("{size}.sst.tmp"));

        group.throughput(Throughput::Bytes(size));
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, _| {
            b.iter(|| copy_checksummed(&storage, &src, &dst, None, None, false).unwrap());
        });
    }
    group.finish();
}

fn bench_manifest_parse(c: &mut Criterion) {
    let mut group = c.benchmark_group("manifest_parse");
    for num_files in [10_usize, 100, 1000] {
        let mut text = String::from("1692000000\n42\n");
        text.push_str(&format!("{num_files}\n"));
        for i in 0..num_files {
            text.push_str(&format!("shared shared/{i:06}.sst 4096 crc32 123456789\n"));
        }

        group.bench_with_input(BenchmarkId::from_parameter(num_files), &text, |b, text| {
            b.iter(|| BackupMeta::parse(1, text).unwrap());
        });
    }
    group.finish();
}

criterion_group!(benches, bench_checksummed_copy, bench_manifest_parse);
criterion_main!(benches);
