//! Index loading and lookup structures.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use boomphf::Mphf;

use crate::{Error, Result};

pub const INDEX_FILE: &str = "transcriptome.sfi";
pub const TRANSCRIPT_LUT_FILE: &str = "transcriptome.tlut";
pub const KMER_LOCATION_FILE: &str = "fullLookup.kmap";

const MPHF_GAMMA: f64 = 1.7;

/// Transcript id stored in the high half of a packed location record.
pub fn location_transcript(loc: u64) -> u32 {
    (loc >> 32) as u32
}

/// Transcript offset stored in the low half of a packed location record.
pub fn location_offset(loc: u64) -> u32 {
    loc as u32
}

pub fn pack_location(transcript_id: u32, offset: u32) -> u64 {
    ((transcript_id as u64) << 32) | offset as u64
}

/// Transcript metadata from the length lookup table.
#[derive(Debug, Clone)]
pub struct TranscriptInfo {
    pub id: u32,
    pub name: String,
    pub length: u32,
}

/// Read-only view of the perfect-hash k-mer index and its location table.
///
/// K-mer ids are the positions of the keys in `transcriptome.sfi`; the CSR
/// location table from `fullLookup.kmap` is keyed by those ids. The MPHF can
/// return an arbitrary slot for a key it was not built over, so every lookup
/// is verified against the stored key before an id is handed out.
pub struct KmerIndex {
    k: u32,
    mphf: Mphf<u64>,
    keys_by_slot: Vec<u64>,
    ids_by_slot: Vec<u32>,
    offsets: Vec<u64>,
    kmer_locs: Vec<u64>,
}

impl KmerIndex {
    /// Assemble a view from raw parts, validating the CSR invariants.
    pub fn from_parts(
        k: u32,
        keys: Vec<u64>,
        offsets: Vec<u64>,
        kmer_locs: Vec<u64>,
    ) -> Result<Self> {
        if k == 0 || k > 32 {
            return Err(Error::UnsupportedFeature(format!(
                "k-mer length {k} out of range"
            )));
        }
        if offsets.len() != keys.len() + 1 {
            return Err(Error::InvalidFormat(format!(
                "offset table has {} entries for {} k-mers",
                offsets.len(),
                keys.len()
            )));
        }
        if offsets.windows(2).any(|w| w[0] > w[1]) {
            return Err(Error::InvalidFormat("offset table not sorted".into()));
        }
        if offsets.last().copied().unwrap_or(0) != kmer_locs.len() as u64 {
            return Err(Error::InvalidFormat(
                "offset table does not span the location table".into(),
            ));
        }

        let mphf = Mphf::new(MPHF_GAMMA, &keys);
        let mut keys_by_slot = vec![0u64; keys.len()];
        let mut ids_by_slot = vec![0u32; keys.len()];
        for (id, &key) in keys.iter().enumerate() {
            let slot = mphf.hash(&key) as usize;
            keys_by_slot[slot] = key;
            ids_by_slot[slot] = id as u32;
        }

        Ok(Self {
            k,
            mphf,
            keys_by_slot,
            ids_by_slot,
            offsets,
            kmer_locs,
        })
    }

    /// Load the index from `transcriptome.sfi` + `fullLookup.kmap` in `dir`.
    pub fn load(dir: &Path) -> Result<Self> {
        let sfi_path = dir.join(INDEX_FILE);
        let file = File::open(&sfi_path).map_err(|_| Error::MissingFile(sfi_path))?;
        let mut reader = BufReader::new(file);
        let k = read_u64_le(&mut reader)?;
        let keys = read_u64_vec(&mut reader)?;

        let kmap_path = dir.join(KMER_LOCATION_FILE);
        let file = File::open(&kmap_path).map_err(|_| Error::MissingFile(kmap_path))?;
        let mut reader = BufReader::new(file);
        let offsets = read_u64_vec(&mut reader)?;
        let kmer_locs = read_u64_vec(&mut reader)?;

        Self::from_parts(k as u32, keys, offsets, kmer_locs)
    }

    pub fn k(&self) -> u32 {
        self.k
    }

    pub fn num_kmers(&self) -> usize {
        self.keys_by_slot.len()
    }

    /// Id of a forward-encoded k-mer, or `None` if it is not in the index.
    pub fn id_of(&self, kmer: u64) -> Option<u32> {
        let slot = self.mphf.try_hash(&kmer)? as usize;
        if self.keys_by_slot.get(slot) == Some(&kmer) {
            Some(self.ids_by_slot[slot])
        } else {
            None
        }
    }

    /// All packed `(transcript, offset)` records for a k-mer; empty if the
    /// k-mer is unknown.
    pub fn locations(&self, kmer: u64) -> &[u64] {
        match self.id_of(kmer) {
            Some(id) => {
                let begin = self.offsets[id as usize] as usize;
                let end = self.offsets[id as usize + 1] as usize;
                &self.kmer_locs[begin..end]
            }
            None => &[],
        }
    }
}

/// Load `transcriptome.tlut` from `dir`, sorted by transcript id.
pub fn load_transcript_table(dir: &Path) -> Result<Vec<TranscriptInfo>> {
    let path = dir.join(TRANSCRIPT_LUT_FILE);
    let file = File::open(&path).map_err(|_| Error::MissingFile(path))?;
    let mut reader = BufReader::new(file);

    let num_records = read_u64_le(&mut reader)?;
    let mut records = Vec::with_capacity(num_records as usize);
    for _ in 0..num_records {
        let id = read_u32_le(&mut reader)?;
        let length = read_u32_le(&mut reader)?;
        let name_len = read_u64_le(&mut reader)? as usize;
        let mut buf = vec![0u8; name_len];
        reader.read_exact(&mut buf)?;
        let name = String::from_utf8_lossy(&buf).to_string();
        records.push(TranscriptInfo { id, name, length });
    }

    records.sort_by_key(|r| r.id);
    for (idx, record) in records.iter().enumerate() {
        if record.id as usize != idx {
            return Err(Error::InvalidFormat(format!(
                "transcript ids are not contiguous: expected {idx}, found {}",
                record.id
            )));
        }
    }
    Ok(records)
}

fn read_u64_vec<R: Read>(reader: &mut R) -> Result<Vec<u64>> {
    let len = read_u64_le(reader)? as usize;
    let mut out = Vec::with_capacity(len);
    for _ in 0..len {
        out.push(read_u64_le(reader)?);
    }
    Ok(out)
}

fn read_u64_le<R: Read>(reader: &mut R) -> Result<u64> {
    let mut buf = [0u8; 8];
    reader.read_exact(&mut buf)?;
    Ok(u64::from_le_bytes(buf))
}

fn read_u32_le<R: Read>(reader: &mut R) -> Result<u32> {
    let mut buf = [0u8; 4];
    reader.read_exact(&mut buf)?;
    Ok(u32::from_le_bytes(buf))
}
