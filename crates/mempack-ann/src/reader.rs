//! Zero-copy search over a memory-mapped `.ann` file.
//!
//! The reader binds the vector region, layer table, and neighbor heap in
//! place and never materializes the graph. Search is the same two-phase
//! HNSW walk the builder uses: greedy descent through the upper layers,
//! then a bounded beam at layer 0.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::fs::File;
use std::path::Path;

use memmap2::Mmap;
use tracing::debug;

use mempack_core::{MemPackError, MemPackResult};

use crate::hnsw::Candidate;
use crate::layout::{parse_ann_header, AnnHeader, ANN_HEADER_LEN, LAYER_ENTRY_LEN};

/// An open, validated `.ann` index.
pub struct AnnReader {
    mmap: Mmap,
    header: AnnHeader,
}

impl AnnReader {
    /// Memory-map and validate an index file.
    pub fn open(path: &Path) -> MemPackResult<Self> {
        let file = File::open(path)?;
        let mmap = unsafe { Mmap::map(&file) }?;
        let header = parse_ann_header(&mmap)?;
        debug!(
            path = %path.display(),
            vectors = header.count,
            dim = header.dim,
            "ann index opened"
        );
        Ok(Self { mmap, header })
    }

    #[must_use]
    pub fn len(&self) -> u32 {
        self.header.count
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.header.count == 0
    }

    #[must_use]
    pub fn dim(&self) -> usize {
        self.header.dim as usize
    }

    #[must_use]
    pub fn header(&self) -> &AnnHeader {
        &self.header
    }

    /// True when the file carries an explicit vector→chunk id map.
    #[must_use]
    pub fn has_id_map(&self) -> bool {
        self.header.id_map_offset != 0
    }

    /// Translate a vector id to its chunk id (identity without a map).
    #[must_use]
    pub fn chunk_id(&self, vector_id: u32) -> u64 {
        if self.header.id_map_offset == 0 {
            return u64::from(vector_id);
        }
        let at = self.header.id_map_offset as usize + vector_id as usize * 8;
        u64::from_le_bytes(self.mmap[at..at + 8].try_into().expect("validated region"))
    }

    /// The embedding of `vector_id`, bound in place.
    #[must_use]
    pub fn vector(&self, vector_id: u32) -> &[f32] {
        let dim = self.header.dim as usize;
        let all: &[f32] = bytemuck::cast_slice(
            &self.mmap[ANN_HEADER_LEN..ANN_HEADER_LEN + self.header.count as usize * dim * 4],
        );
        let start = vector_id as usize * dim;
        &all[start..start + dim]
    }

    /// `search(query, top_k, ef_search)`: nearest vectors as
    /// `(vector_id, distance)` ordered by `(distance asc, id asc)`.
    pub fn search(&self, query: &[f32], top_k: usize, ef_search: usize) -> MemPackResult<Vec<(u32, f32)>> {
        if query.len() != self.dim() && self.header.count > 0 {
            return Err(MemPackError::DimensionMismatch {
                expected: self.dim(),
                actual: query.len(),
            });
        }
        if self.header.count == 0 || top_k == 0 {
            return Ok(Vec::new());
        }

        let mut ep = self.header.entry_point;
        let mut ep_dist = self.distance(ep, query);
        for level in (1..=self.top_level(ep)?).rev() {
            (ep, ep_dist) = self.greedy_step(ep, ep_dist, query, level)?;
        }

        let ef = ef_search.max(top_k);
        let found = self.search_layer(ep, ep_dist, query, ef)?;
        Ok(found
            .into_iter()
            .take(top_k)
            .map(|c| (c.id, c.dist))
            .collect())
    }

    fn distance(&self, vector_id: u32, query: &[f32]) -> f32 {
        let v = self.vector(vector_id);
        let dot: f32 = v.iter().zip(query).map(|(a, b)| a * b).sum();
        1.0 - dot
    }

    fn layer_entry(&self, vector_id: u32) -> MemPackResult<(u32, u8)> {
        let at = self.header.layer_table_offset as usize + vector_id as usize * LAYER_ENTRY_LEN;
        let bytes = self
            .mmap
            .get(at..at + LAYER_ENTRY_LEN)
            .ok_or_else(|| ann_corrupt("layer table truncated"))?;
        let offset = u32::from_le_bytes(bytes[0..4].try_into().expect("fixed"));
        Ok((offset, bytes[4]))
    }

    fn top_level(&self, vector_id: u32) -> MemPackResult<u8> {
        let (_, level_count) = self.layer_entry(vector_id)?;
        if level_count == 0 {
            return Err(ann_corrupt("node with zero layers"));
        }
        Ok(level_count - 1)
    }

    /// Neighbor ids of a node at a level; empty when the node does not
    /// reach that level.
    fn neighbors_of(&self, vector_id: u32, level: u8) -> MemPackResult<NeighborIter<'_>> {
        let (offset, level_count) = self.layer_entry(vector_id)?;
        if level >= level_count {
            return Ok(NeighborIter { bytes: &[] });
        }
        let mut pos = self.header.neighbors_offset as usize + offset as usize;
        for current in 0..=level {
            let count_bytes = self
                .mmap
                .get(pos..pos + 2)
                .ok_or_else(|| ann_corrupt("neighbor heap truncated"))?;
            let count = u16::from_le_bytes(count_bytes.try_into().expect("fixed")) as usize;
            pos += 2;
            let end = pos
                .checked_add(count * 4)
                .filter(|&e| e <= self.mmap.len())
                .ok_or_else(|| ann_corrupt("neighbor heap truncated"))?;
            if current == level {
                return Ok(NeighborIter {
                    bytes: &self.mmap[pos..end],
                });
            }
            pos = end;
        }
        unreachable!("loop returns at target level")
    }

    fn greedy_step(
        &self,
        mut current: u32,
        mut dist: f32,
        query: &[f32],
        level: u8,
    ) -> MemPackResult<(u32, f32)> {
        loop {
            let mut improved = false;
            for neighbor in self.neighbors_of(current, level)? {
                let d = self.distance(neighbor, query);
                if d < dist {
                    current = neighbor;
                    dist = d;
                    improved = true;
                }
            }
            if !improved {
                return Ok((current, dist));
            }
        }
    }

    fn search_layer(
        &self,
        entry: u32,
        entry_dist: f32,
        query: &[f32],
        ef: usize,
    ) -> MemPackResult<Vec<Candidate>> {
        let mut visited = vec![false; self.header.count as usize];
        visited[entry as usize] = true;

        let mut frontier = BinaryHeap::new();
        let mut results: BinaryHeap<Candidate> = BinaryHeap::new();
        frontier.push(Reverse(Candidate {
            dist: entry_dist,
            id: entry,
        }));
        results.push(Candidate {
            dist: entry_dist,
            id: entry,
        });

        while let Some(Reverse(candidate)) = frontier.pop() {
            let worst = results.peek().expect("results never empty").dist;
            if candidate.dist > worst && results.len() >= ef {
                break;
            }
            for neighbor in self.neighbors_of(candidate.id, 0)? {
                let seen = visited
                    .get_mut(neighbor as usize)
                    .ok_or_else(|| ann_corrupt("neighbor id out of range"))?;
                if std::mem::replace(seen, true) {
                    continue;
                }
                let d = self.distance(neighbor, query);
                let worst = results.peek().expect("results never empty").dist;
                if results.len() < ef || d < worst {
                    frontier.push(Reverse(Candidate {
                        dist: d,
                        id: neighbor,
                    }));
                    results.push(Candidate { dist: d, id: neighbor });
                    if results.len() > ef {
                        results.pop();
                    }
                }
            }
        }

        let mut out = results.into_vec();
        out.sort_unstable();
        Ok(out)
    }
}

/// Iterator over little-endian u32 neighbor ids bound to the mmap.
struct NeighborIter<'a> {
    bytes: &'a [u8],
}

impl Iterator for NeighborIter<'_> {
    type Item = u32;

    fn next(&mut self) -> Option<u32> {
        if self.bytes.len() < 4 {
            return None;
        }
        let (head, rest) = self.bytes.split_at(4);
        self.bytes = rest;
        Some(u32::from_le_bytes(head.try_into().expect("fixed")))
    }
}

fn ann_corrupt(reason: &str) -> MemPackError {
    MemPackError::AnnCorrupt {
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hnsw::HnswIndex;
    use crate::layout::encode_ann;
    use mempack_core::{l2_normalize, HnswParams};
    use tempfile::TempDir;

    fn params() -> HnswParams {
        HnswParams {
            m: 8,
            ef_construction: 40,
            ef_search: 16,
            seed: 3,
        }
    }

    fn build_vectors(n: u32, dim: usize) -> Vec<Vec<f32>> {
        (0..n)
            .map(|i| {
                let mut v: Vec<f32> = (0..dim)
                    .map(|j| ((i.wrapping_mul(37) + j as u32 * 11) % 17) as f32 - 8.0)
                    .collect();
                l2_normalize(&mut v);
                v
            })
            .collect()
    }

    fn write_index(
        dir: &TempDir,
        vectors: &[Vec<f32>],
        id_map: Option<&[u64]>,
    ) -> std::path::PathBuf {
        let mut index = HnswIndex::new(vectors[0].len(), &params());
        for v in vectors {
            index.insert(v).unwrap();
        }
        let bytes = encode_ann(&index, id_map).unwrap();
        let path = dir.path().join("index.ann");
        std::fs::write(&path, bytes).unwrap();
        path
    }

    #[test]
    fn mapped_search_agrees_with_builder() {
        let dir = TempDir::new().unwrap();
        let vectors = build_vectors(50, 8);
        let path = write_index(&dir, &vectors, None);

        let mut index = HnswIndex::new(8, &params());
        for v in &vectors {
            index.insert(v).unwrap();
        }
        let reader = AnnReader::open(&path).unwrap();
        assert_eq!(reader.len(), 50);

        for query in vectors.iter().take(8) {
            let from_builder = index.search(query, 5, 32).unwrap();
            let from_mmap = reader.search(query, 5, 32).unwrap();
            assert_eq!(from_builder, from_mmap);
        }
    }

    #[test]
    fn identity_and_explicit_id_maps() {
        let dir = TempDir::new().unwrap();
        let vectors = build_vectors(10, 8);

        let path = write_index(&dir, &vectors, None);
        let reader = AnnReader::open(&path).unwrap();
        assert!(!reader.has_id_map());
        assert_eq!(reader.chunk_id(4), 4);

        let map: Vec<u64> = (0..10u64).map(|i| i * 3 + 1).collect();
        let path = write_index(&dir, &vectors, Some(&map));
        let reader = AnnReader::open(&path).unwrap();
        assert!(reader.has_id_map());
        assert_eq!(reader.chunk_id(4), 13);
    }

    #[test]
    fn top_k_zero_and_oversized_k() {
        let dir = TempDir::new().unwrap();
        let vectors = build_vectors(5, 8);
        let path = write_index(&dir, &vectors, None);
        let reader = AnnReader::open(&path).unwrap();

        assert!(reader.search(&vectors[0], 0, 16).unwrap().is_empty());
        let all = reader.search(&vectors[0], 50, 64).unwrap();
        assert_eq!(all.len(), 5, "top_k beyond N returns all available");
    }

    #[test]
    fn dimension_mismatch_is_rejected() {
        let dir = TempDir::new().unwrap();
        let vectors = build_vectors(5, 8);
        let path = write_index(&dir, &vectors, None);
        let reader = AnnReader::open(&path).unwrap();
        assert!(matches!(
            reader.search(&[1.0, 2.0], 3, 16),
            Err(MemPackError::DimensionMismatch { expected: 8, actual: 2 })
        ));
    }
}
