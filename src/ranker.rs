use std::cmp::Ordering;

use ndarray::{Array1, Array2};

use crate::error::{Error, Result};

/// Position of a corpus vector and its similarity to the query.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Ranked {
    pub index: usize,
    pub score: f32,
}

/// Nearest-neighbour search over a fixed set of corpus vectors.
pub trait NearestNeighbors: Send + Sync {
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn dimensions(&self) -> usize;

    /// Returns at most `k` results, highest score first, ties by ascending index.
    fn top_k(&self, query: &[f32], k: usize) -> Result<Vec<Ranked>>;
}

/// Exact search: scores every vector with a raw inner product.
#[derive(Debug, Clone)]
pub struct FlatIndex {
    vectors: Array2<f32>,
}

impl FlatIndex {
    pub fn new(vectors: &[Vec<f32>]) -> Result<Self> {
        let dims = vectors.first().map_or(0, Vec::len);
        let mut flat = Vec::with_capacity(vectors.len() * dims);
        for vector in vectors {
            if vector.len() != dims {
                return Err(Error::DimensionMismatch {
                    expected: dims,
                    found: vector.len(),
                });
            }
            flat.extend_from_slice(vector);
        }

        let rows = vectors.len();
        let found = flat.len();
        let vectors =
            Array2::from_shape_vec((rows, dims), flat).map_err(|_| Error::DimensionMismatch {
                expected: rows * dims,
                found,
            })?;
        Ok(Self { vectors })
    }
}

impl NearestNeighbors for FlatIndex {
    fn len(&self) -> usize {
        self.vectors.nrows()
    }

    fn dimensions(&self) -> usize {
        self.vectors.ncols()
    }

    fn top_k(&self, query: &[f32], k: usize) -> Result<Vec<Ranked>> {
        if self.is_empty() {
            return Ok(Vec::new());
        }
        if k == 0 {
            return Err(Error::InvalidK);
        }
        if query.len() != self.dimensions() {
            return Err(Error::DimensionMismatch {
                expected: self.dimensions(),
                found: query.len(),
            });
        }

        let query = Array1::from(query.to_vec());
        let scores = self.vectors.dot(&query);

        let mut ranked: Vec<Ranked> = scores
            .iter()
            .enumerate()
            .map(|(index, &score)| Ranked { index, score })
            .collect();

        let k = k.min(ranked.len());
        if k < ranked.len() {
            ranked.select_nth_unstable_by(k - 1, by_relevance);
            ranked.truncate(k);
        }
        ranked.sort_by(by_relevance);
        Ok(ranked)
    }
}

/// Descending score with NaN last, then ascending index.
fn by_relevance(a: &Ranked, b: &Ranked) -> Ordering {
    let by_score = match (a.score.is_nan(), b.score.is_nan()) {
        (false, false) => b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal),
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        (true, true) => Ordering::Equal,
    };
    by_score.then(a.index.cmp(&b.index))
}
