use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use tempfile::TempDir;

use sdafish::index::pack_location;
use sdafish::kmer::encode;

pub const K: u32 = 5;

pub struct SyntheticIndex {
    pub tempdir: TempDir,
    pub index_dir: PathBuf,
}

/// Write `transcriptome.sfi`, `fullLookup.kmap` and `transcriptome.tlut`
/// for the given transcripts, forward-indexing every k-mer occurrence.
pub fn write_index(transcripts: &[(String, Vec<u8>)], k: u32) -> SyntheticIndex {
    let tempdir = TempDir::new().expect("tempdir");
    let index_dir = tempdir.path().join("index");
    std::fs::create_dir_all(&index_dir).expect("index dir");

    let mut by_kmer: HashMap<u64, Vec<u64>> = HashMap::new();
    for (tid, (_, seq)) in transcripts.iter().enumerate() {
        if seq.len() < k as usize {
            continue;
        }
        for pos in 0..=seq.len() - k as usize {
            if let Some(code) = encode(&seq[pos..pos + k as usize]) {
                by_kmer
                    .entry(code)
                    .or_default()
                    .push(pack_location(tid as u32, pos as u32));
            }
        }
    }
    let mut keys: Vec<u64> = by_kmer.keys().copied().collect();
    keys.sort_unstable();
    let mut offsets = vec![0u64];
    let mut locs: Vec<u64> = Vec::new();
    for key in &keys {
        locs.extend_from_slice(&by_kmer[key]);
        offsets.push(locs.len() as u64);
    }

    let mut sfi = BufWriter::new(File::create(index_dir.join("transcriptome.sfi")).unwrap());
    write_u64(&mut sfi, k as u64);
    write_u64(&mut sfi, keys.len() as u64);
    for key in &keys {
        write_u64(&mut sfi, *key);
    }
    drop(sfi);

    let mut kmap = BufWriter::new(File::create(index_dir.join("fullLookup.kmap")).unwrap());
    write_u64(&mut kmap, offsets.len() as u64);
    for value in &offsets {
        write_u64(&mut kmap, *value);
    }
    write_u64(&mut kmap, locs.len() as u64);
    for value in &locs {
        write_u64(&mut kmap, *value);
    }
    drop(kmap);

    let mut tlut = BufWriter::new(File::create(index_dir.join("transcriptome.tlut")).unwrap());
    write_u64(&mut tlut, transcripts.len() as u64);
    for (tid, (name, seq)) in transcripts.iter().enumerate() {
        write_u32(&mut tlut, tid as u32);
        write_u32(&mut tlut, seq.len() as u32);
        write_u64(&mut tlut, name.len() as u64);
        tlut.write_all(name.as_bytes()).unwrap();
    }
    drop(tlut);

    SyntheticIndex { tempdir, index_dir }
}

fn write_u64<W: Write>(writer: &mut W, value: u64) {
    writer.write_all(&value.to_le_bytes()).unwrap();
}

fn write_u32<W: Write>(writer: &mut W, value: u32) {
    writer.write_all(&value.to_le_bytes()).unwrap();
}

pub fn write_fastq(path: &Path, reads: &[Vec<u8>]) {
    let mut out = BufWriter::new(File::create(path).unwrap());
    for (i, read) in reads.iter().enumerate() {
        out.write_all(format!("@r{}\n", i + 1).as_bytes()).unwrap();
        out.write_all(read).unwrap();
        out.write_all(b"\n+\n").unwrap();
        out.write_all(&vec![b'I'; read.len()]).unwrap();
        out.write_all(b"\n").unwrap();
    }
}

pub fn revcomp(seq: &[u8]) -> Vec<u8> {
    seq.iter()
        .rev()
        .map(|&b| match b {
            b'A' => b'T',
            b'C' => b'G',
            b'G' => b'C',
            b'T' => b'A',
            other => other,
        })
        .collect()
}

/// Deterministic sequence in which no k-mer (or its reverse complement)
/// occurs twice, so coverage scores are exact.
pub fn unique_kmer_seq(len: usize, seed: u64) -> Vec<u8> {
    let bases = [b'A', b'C', b'G', b'T'];
    let mut state = seed.wrapping_mul(0x9e37_79b9_7f4a_7c15).max(1);
    let mut step = || {
        state = state
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        (state >> 33) as usize & 3
    };
    let revcomp_code = |code: u64| -> u64 {
        let mut rc = 0u64;
        for i in 0..K {
            rc = (rc << 2) | (3 - ((code >> (2 * i)) & 3));
        }
        rc
    };
    let mut seq: Vec<u8> = (0..K as usize).map(|_| bases[step()]).collect();
    let mut seen = HashSet::new();
    let first = encode(&seq).unwrap();
    seen.insert(first);
    seen.insert(revcomp_code(first));
    while seq.len() < len {
        let offset = step();
        let extended = (0..4).find_map(|i| {
            let base = bases[(offset + i) & 3];
            seq.push(base);
            let code = encode(&seq[seq.len() - K as usize..]).unwrap();
            if !seen.contains(&code) && !seen.contains(&revcomp_code(code)) {
                seen.insert(code);
                seen.insert(revcomp_code(code));
                Some(base)
            } else {
                seq.pop();
                None
            }
        });
        assert!(extended.is_some(), "ran out of fresh k-mers");
    }
    seq
}
