//! Reed–Solomon erasure coding over block payloads.
//!
//! Blocks are grouped into consecutive runs of `k`; each group gets `m`
//! parity shards computed over the compressed payloads, zero-padded to the
//! largest member. A short final group is treated as if padded with
//! all-zero virtual shards, which are always "intact" during repair. Any
//! `k` intact members of a group reconstruct the rest; groups are strictly
//! consecutive by block id and there is no interleaving.

mod gf256;

pub use gf256::Gf256;

use mempack_core::{EccParams, MemPackError, MemPackResult};

use crate::layout::header_corrupt;

/// Systematic Reed–Solomon codec over GF(2^8).
///
/// The encoding matrix is a `(k+m) × k` Vandermonde matrix normalized so its
/// top `k` rows are the identity: data shards pass through unchanged and the
/// bottom `m` rows generate parity. Any `k` rows remain linearly
/// independent, which is exactly the repair guarantee.
#[derive(Debug)]
pub struct ReedSolomon {
    k: usize,
    m: usize,
    gf: Gf256,
    matrix: Vec<Vec<u8>>,
}

impl ReedSolomon {
    pub fn new(params: EccParams) -> MemPackResult<Self> {
        let EccParams { k, m } = params;
        if k == 0 || m == 0 || k + m > 255 {
            return Err(MemPackError::InvalidConfig {
                message: format!("invalid ECC parameters k={k}, m={m}"),
            });
        }
        let gf = Gf256::new();

        // Vandermonde over the distinct points 0..k+m.
        let vandermonde: Vec<Vec<u8>> = (0..k + m)
            .map(|r| (0..k).map(|c| gf.pow(r as u8, c)).collect())
            .collect();

        let top_inverse = invert(&gf, &vandermonde[..k]).ok_or_else(|| {
            MemPackError::InvalidConfig {
                message: "degenerate ECC encoding matrix".to_string(),
            }
        })?;

        // matrix = vandermonde × inv(top): top k rows become the identity.
        let matrix = vandermonde
            .iter()
            .map(|row| mat_vec_rows(&gf, row, &top_inverse))
            .collect();

        Ok(Self { k, m, gf, matrix })
    }

    #[must_use]
    pub fn data_shards(&self) -> usize {
        self.k
    }

    #[must_use]
    pub fn parity_shards(&self) -> usize {
        self.m
    }

    /// Compute the `m` parity shards for `k` equal-length data shards.
    pub fn encode(&self, data: &[&[u8]]) -> MemPackResult<Vec<Vec<u8>>> {
        if data.len() != self.k {
            return Err(MemPackError::InvalidConfig {
                message: format!("expected {} data shards, got {}", self.k, data.len()),
            });
        }
        let shard_len = data[0].len();
        let mut parity = vec![vec![0u8; shard_len]; self.m];
        for (p, out) in parity.iter_mut().enumerate() {
            let row = &self.matrix[self.k + p];
            for (d, shard) in data.iter().enumerate() {
                self.gf.mul_acc(out, shard, row[d]);
            }
        }
        Ok(parity)
    }

    /// Fill in missing **data** shards from any `k` intact members.
    ///
    /// `shards` holds `k + m` entries in group order; `None` marks a lost
    /// shard. Fails with `EccUnrecoverable` when fewer than `k` survive.
    pub fn reconstruct(&self, shards: &mut [Option<Vec<u8>>], group_id: u32) -> MemPackResult<()> {
        if shards.len() != self.k + self.m {
            return Err(MemPackError::InvalidConfig {
                message: format!("expected {} shards, got {}", self.k + self.m, shards.len()),
            });
        }
        let present: Vec<usize> = shards
            .iter()
            .enumerate()
            .filter_map(|(i, s)| s.is_some().then_some(i))
            .take(self.k)
            .collect();
        if present.len() < self.k {
            return Err(MemPackError::EccUnrecoverable {
                group_id,
                intact: present.len(),
                needed: self.k,
            });
        }
        if shards[..self.k].iter().all(Option::is_some) {
            return Ok(()); // nothing to do
        }

        let sub: Vec<Vec<u8>> = present.iter().map(|&i| self.matrix[i].clone()).collect();
        let decode = invert(&self.gf, &sub).ok_or(MemPackError::EccUnrecoverable {
            group_id,
            intact: present.len(),
            needed: self.k,
        })?;

        let shard_len = shards[present[0]].as_ref().expect("present").len();
        for d in 0..self.k {
            if shards[d].is_some() {
                continue;
            }
            let mut out = vec![0u8; shard_len];
            for (j, &src) in present.iter().enumerate() {
                let coef = decode[d][j];
                let shard = shards[src].as_ref().expect("present");
                self.gf.mul_acc(&mut out, shard, coef);
            }
            shards[d] = Some(out);
        }
        Ok(())
    }
}

/// Gauss–Jordan inversion of a square matrix. `None` if singular.
fn invert(gf: &Gf256, rows: &[Vec<u8>]) -> Option<Vec<Vec<u8>>> {
    let n = rows.len();
    let mut work: Vec<Vec<u8>> = rows
        .iter()
        .enumerate()
        .map(|(i, row)| {
            let mut extended = row.clone();
            extended.resize(2 * n, 0);
            extended[n + i] = 1;
            extended
        })
        .collect();

    for col in 0..n {
        let pivot = (col..n).find(|&r| work[r][col] != 0)?;
        work.swap(col, pivot);

        let inv_pivot = gf.inv(work[col][col]);
        for value in work[col].iter_mut() {
            *value = gf.mul(*value, inv_pivot);
        }

        for row in 0..n {
            if row == col || work[row][col] == 0 {
                continue;
            }
            let factor = work[row][col];
            let (pivot_row, target_row) = if row < col {
                let (a, b) = work.split_at_mut(col);
                (&b[0], &mut a[row])
            } else {
                let (a, b) = work.split_at_mut(row);
                (&a[col], &mut b[0])
            };
            for (t, &p) in target_row.iter_mut().zip(pivot_row.iter()) {
                *t ^= gf.mul(factor, p);
            }
        }
    }

    Some(work.into_iter().map(|row| row[n..].to_vec()).collect())
}

/// Row-vector × matrix: `out[c] = Σ_i row[i] * matrix[i][c]`.
fn mat_vec_rows(gf: &Gf256, row: &[u8], matrix: &[Vec<u8>]) -> Vec<u8> {
    let cols = matrix[0].len();
    let mut out = vec![0u8; cols];
    for (i, &coef) in row.iter().enumerate() {
        gf.mul_acc(&mut out, &matrix[i], coef);
    }
    out
}

/// One ECC group: which blocks it covers and where its parity lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EccGroup {
    pub group_id: u32,
    pub block_ids: Vec<u32>,
    pub padded_size: u32,
    /// Offset of the group's first parity shard in the parity heap.
    pub parity_offset: u64,
    /// Bytes per parity shard (equals `padded_size`).
    pub parity_size: u32,
}

/// Decoded ECCG section: parameters, group table, parity heap.
#[derive(Debug)]
pub struct EccSection {
    pub params: EccParams,
    pub groups: Vec<EccGroup>,
    pub parity: Vec<u8>,
}

impl EccSection {
    /// Build groups and parity over the compressed block payloads.
    pub fn build(params: EccParams, payloads: &[Vec<u8>]) -> MemPackResult<Self> {
        let rs = ReedSolomon::new(params)?;
        let k = params.k;
        let mut groups = Vec::new();
        let mut parity_heap = Vec::new();

        for (group_idx, members) in payloads.chunks(k).enumerate() {
            let padded_size = members.iter().map(Vec::len).max().unwrap_or(0);
            let padded: Vec<Vec<u8>> = (0..k)
                .map(|d| {
                    let mut shard = members.get(d).cloned().unwrap_or_default();
                    shard.resize(padded_size, 0);
                    shard
                })
                .collect();
            let shard_refs: Vec<&[u8]> = padded.iter().map(Vec::as_slice).collect();
            let parity = rs.encode(&shard_refs)?;

            let first_block = (group_idx * k) as u32;
            groups.push(EccGroup {
                group_id: group_idx as u32,
                block_ids: (0..members.len() as u32).map(|i| first_block + i).collect(),
                padded_size: padded_size as u32,
                parity_offset: parity_heap.len() as u64,
                parity_size: padded_size as u32,
            });
            for shard in parity {
                parity_heap.extend_from_slice(&shard);
            }
        }

        Ok(Self {
            params,
            groups,
            parity: parity_heap,
        })
    }

    /// Encode the section body.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(&(self.params.k as u16).to_le_bytes());
        buf.extend_from_slice(&(self.params.m as u16).to_le_bytes());
        buf.extend_from_slice(&(self.groups.len() as u32).to_le_bytes());
        for group in &self.groups {
            buf.extend_from_slice(&group.group_id.to_le_bytes());
            buf.extend_from_slice(&(group.block_ids.len() as u16).to_le_bytes());
            for &block_id in &group.block_ids {
                buf.extend_from_slice(&block_id.to_le_bytes());
            }
            buf.extend_from_slice(&group.padded_size.to_le_bytes());
            buf.extend_from_slice(&group.parity_offset.to_le_bytes());
            buf.extend_from_slice(&group.parity_size.to_le_bytes());
        }
        buf.extend_from_slice(&self.parity);
        buf
    }

    /// Decode a section body.
    pub fn decode(bytes: &[u8]) -> MemPackResult<Self> {
        let mut pos = 0usize;
        let take = |pos: &mut usize, n: usize| -> MemPackResult<&[u8]> {
            let end = pos
                .checked_add(n)
                .filter(|&e| e <= bytes.len())
                .ok_or_else(|| header_corrupt("ECC section truncated"))?;
            let slice = &bytes[*pos..end];
            *pos = end;
            Ok(slice)
        };

        let k = u16::from_le_bytes(take(&mut pos, 2)?.try_into().expect("fixed")) as usize;
        let m = u16::from_le_bytes(take(&mut pos, 2)?.try_into().expect("fixed")) as usize;
        let group_count = u32::from_le_bytes(take(&mut pos, 4)?.try_into().expect("fixed"));

        let mut groups = Vec::with_capacity(group_count as usize);
        for _ in 0..group_count {
            let group_id = u32::from_le_bytes(take(&mut pos, 4)?.try_into().expect("fixed"));
            let block_count =
                u16::from_le_bytes(take(&mut pos, 2)?.try_into().expect("fixed")) as usize;
            let mut block_ids = Vec::with_capacity(block_count);
            for _ in 0..block_count {
                block_ids.push(u32::from_le_bytes(
                    take(&mut pos, 4)?.try_into().expect("fixed"),
                ));
            }
            let padded_size = u32::from_le_bytes(take(&mut pos, 4)?.try_into().expect("fixed"));
            let parity_offset = u64::from_le_bytes(take(&mut pos, 8)?.try_into().expect("fixed"));
            let parity_size = u32::from_le_bytes(take(&mut pos, 4)?.try_into().expect("fixed"));
            groups.push(EccGroup {
                group_id,
                block_ids,
                padded_size,
                parity_offset,
                parity_size,
            });
        }

        Ok(Self {
            params: EccParams { k, m },
            groups,
            parity: bytes[pos..].to_vec(),
        })
    }

    /// Locate the group covering `block_id` and its position inside it.
    #[must_use]
    pub fn group_for_block(&self, block_id: u32) -> Option<(&EccGroup, usize)> {
        let group = self.groups.get(block_id as usize / self.params.k)?;
        let pos = group.block_ids.iter().position(|&b| b == block_id)?;
        Some((group, pos))
    }

    /// A group's `p`-th parity shard.
    pub fn parity_shard(&self, group: &EccGroup, p: usize) -> MemPackResult<&[u8]> {
        let start = group.parity_offset as usize + p * group.parity_size as usize;
        let end = start + group.parity_size as usize;
        if end > self.parity.len() {
            return Err(header_corrupt("parity heap truncated"));
        }
        Ok(&self.parity[start..end])
    }

    /// Reconstruct the padded payload of `block_id`.
    ///
    /// `intact_payload` returns the compressed payload of a surviving member
    /// block, or `None` if that member is itself corrupt. The returned shard
    /// is padded; the caller truncates to the block's compressed size.
    pub fn repair_block(
        &self,
        block_id: u32,
        intact_payload: &dyn Fn(u32) -> Option<Vec<u8>>,
    ) -> MemPackResult<Vec<u8>> {
        let (group, target_pos) = self
            .group_for_block(block_id)
            .ok_or(MemPackError::BlockCorrupt { block_id })?;
        let rs = ReedSolomon::new(self.params)?;
        let padded = group.padded_size as usize;
        let k = self.params.k;

        let mut shards: Vec<Option<Vec<u8>>> = Vec::with_capacity(k + self.params.m);
        for d in 0..k {
            match group.block_ids.get(d) {
                Some(&member) if member == block_id => shards.push(None),
                Some(&member) => shards.push(intact_payload(member).map(|mut payload| {
                    payload.resize(padded, 0);
                    payload
                })),
                // Virtual zero shard of a short final group: always intact.
                None => shards.push(Some(vec![0u8; padded])),
            }
        }
        for p in 0..self.params.m {
            shards.push(Some(self.parity_shard(group, p)?.to_vec()));
        }

        rs.reconstruct(&mut shards, group.group_id)?;
        Ok(shards[target_pos].take().expect("reconstructed"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shards(k: usize, len: usize) -> Vec<Vec<u8>> {
        (0..k)
            .map(|i| (0..len).map(|j| ((i * 31 + j * 7) % 251) as u8).collect())
            .collect()
    }

    #[test]
    fn parity_recovers_any_m_losses() {
        let params = EccParams { k: 4, m: 2 };
        let rs = ReedSolomon::new(params).unwrap();
        let data = shards(4, 64);
        let refs: Vec<&[u8]> = data.iter().map(Vec::as_slice).collect();
        let parity = rs.encode(&refs).unwrap();

        // Drop every pair of data shards in turn.
        for lost_a in 0..4 {
            for lost_b in lost_a + 1..4 {
                let mut all: Vec<Option<Vec<u8>>> = data
                    .iter()
                    .cloned()
                    .map(Some)
                    .chain(parity.iter().cloned().map(Some))
                    .collect();
                all[lost_a] = None;
                all[lost_b] = None;
                rs.reconstruct(&mut all, 0).unwrap();
                assert_eq!(all[lost_a].as_ref().unwrap(), &data[lost_a]);
                assert_eq!(all[lost_b].as_ref().unwrap(), &data[lost_b]);
            }
        }
    }

    #[test]
    fn too_many_losses_are_unrecoverable() {
        let params = EccParams { k: 4, m: 2 };
        let rs = ReedSolomon::new(params).unwrap();
        let data = shards(4, 32);
        let refs: Vec<&[u8]> = data.iter().map(Vec::as_slice).collect();
        let parity = rs.encode(&refs).unwrap();

        let mut all: Vec<Option<Vec<u8>>> = data
            .into_iter()
            .map(Some)
            .chain(parity.into_iter().map(Some))
            .collect();
        all[0] = None;
        all[1] = None;
        all[2] = None;
        assert!(matches!(
            rs.reconstruct(&mut all, 9),
            Err(MemPackError::EccUnrecoverable { group_id: 9, .. })
        ));
    }

    #[test]
    fn section_round_trip_and_repair() {
        let params = EccParams { k: 3, m: 2 };
        // Five blocks of differing sizes: one full group plus a short group.
        let payloads: Vec<Vec<u8>> = vec![
            vec![1; 40],
            vec![2; 55],
            vec![3; 33],
            vec![4; 20],
            vec![5; 25],
        ];
        let section = EccSection::build(params, &payloads).unwrap();
        assert_eq!(section.groups.len(), 2);
        assert_eq!(section.groups[0].padded_size, 55);
        assert_eq!(section.groups[1].block_ids, vec![3, 4]);

        let decoded = EccSection::decode(&section.encode()).unwrap();
        assert_eq!(decoded.params, params);
        assert_eq!(decoded.groups, section.groups);
        assert_eq!(decoded.parity, section.parity);

        // Repair block 1 from its surviving neighbors.
        let repaired = decoded
            .repair_block(1, &|member| Some(payloads[member as usize].clone()))
            .unwrap();
        assert_eq!(&repaired[..55], &{
            let mut want = payloads[1].clone();
            want.resize(55, 0);
            want
        }[..]);

        // Repair inside the short final group: virtual shards fill in.
        let repaired = decoded
            .repair_block(4, &|member| Some(payloads[member as usize].clone()))
            .unwrap();
        assert_eq!(&repaired[..payloads[4].len()], &payloads[4][..]);
    }

    #[test]
    fn repair_fails_when_group_is_gutted() {
        let params = EccParams { k: 2, m: 1 };
        let payloads: Vec<Vec<u8>> = vec![vec![7; 16], vec![9; 16]];
        let section = EccSection::build(params, &payloads).unwrap();

        // The target and its only data sibling are both gone; the single
        // parity shard cannot reconstruct two losses.
        assert!(matches!(
            section.repair_block(0, &|_| None),
            Err(MemPackError::EccUnrecoverable { intact: 1, needed: 2, .. })
        ));
    }
}
