//! IVF_PQ training for the approximate search mode.

use docrag_core::{Error, Result};
use lancedb::index::{vector::IvfPqIndexBuilder, Index};
use lancedb::{DistanceType, Table};

use crate::schema::VECTOR_COLUMN;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IvfPqParams {
    pub nlist: usize,
    pub m: usize,
    pub nbits: usize,
}

pub fn compute_ivfpq_params(total_ready: usize, dim: usize) -> IvfPqParams {
    let sqrt_n = (total_ready as f64).sqrt() as usize;
    let mut nlist = std::cmp::min(2 * sqrt_n, 65536);
    // Keep a few hundred vectors per partition on small tables.
    nlist = std::cmp::min(nlist, total_ready / 256);
    nlist = std::cmp::max(nlist, 1);
    let preferred = if dim >= 1024 { 32 } else { 16 };
    let m = [preferred, 16, 8, 4, 2, 1].into_iter().find(|m| *m <= dim && dim % m == 0).unwrap_or(1);
    IvfPqParams { nlist, m, nbits: 8 }
}

pub async fn build_ivfpq_index(table: &Table, params: &IvfPqParams) -> Result<()> {
    table
        .create_index(
            &[VECTOR_COLUMN],
            Index::IvfPq(
                IvfPqIndexBuilder::default()
                    .distance_type(DistanceType::Cosine)
                    .num_partitions(params.nlist as u32)
                    .num_sub_vectors(params.m as u32),
            ),
        )
        .replace(true)
        .execute()
        .await
        .map_err(Error::index_io)
}

pub async fn has_vector_index(table: &Table) -> Result<bool> {
    let indices = table.list_indices().await.map_err(Error::index_io)?;
    Ok(indices.iter().any(|i| i.columns.iter().any(|c| c == VECTOR_COLUMN)))
}
