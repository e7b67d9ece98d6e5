//! Truncated SVD of a sparse matrix by block subspace iteration.

use nalgebra::{DMatrix, SymmetricEigen};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::tfidf::SparseMatrix;
use crate::VectorizeError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SvdConfig {
    pub components: usize,
    pub iterations: usize,
    pub seed: u64,
}

impl Default for SvdConfig {
    fn default() -> Self {
        Self {
            components: 30,
            iterations: 100,
            seed: 0,
        }
    }
}

/// Projects every row of `matrix` onto its top `components` right singular
/// vectors, i.e. returns the rows of `U·Σ`.
///
/// Components come out sorted by singular value. Each component's sign is
/// fixed so that its largest-magnitude entry across rows is positive.
pub fn truncated_svd(matrix: &SparseMatrix, config: SvdConfig) -> Result<Vec<Vec<f64>>, VectorizeError> {
    let k = config.components;
    let limit = matrix.n_rows().min(matrix.n_cols);
    if k == 0 || k >= limit {
        return Err(VectorizeError::TooManyComponents { requested: k, limit });
    }

    let mut rng = StdRng::seed_from_u64(config.seed);
    let start = DMatrix::from_fn(matrix.n_cols, k, |_, _| rng.random::<f64>() - 0.5);
    let mut basis = start.qr().q();

    for _ in 0..config.iterations {
        let projected = matrix.mul_dense(&basis);
        basis = matrix.transpose_mul_dense(&projected).qr().q();
    }

    // Rayleigh-Ritz on the converged subspace.
    let projected = matrix.mul_dense(&basis);
    let gram = projected.transpose() * &projected;
    let eigen = SymmetricEigen::new(gram);

    let mut order: Vec<usize> = (0..k).collect();
    order.sort_by(|&a, &b| eigen.eigenvalues[b].total_cmp(&eigen.eigenvalues[a]));
    let rotation = DMatrix::from_fn(k, k, |i, j| eigen.eigenvectors[(i, order[j])]);

    let mut components = projected * rotation;
    for mut column in components.column_iter_mut() {
        let pivot = column
            .iter()
            .copied()
            .fold(0.0f64, |best, v| if v.abs() > best.abs() { v } else { best });
        if pivot < 0.0 {
            column.iter_mut().for_each(|v| *v = -*v);
        }
    }

    Ok(components
        .row_iter()
        .map(|row| row.iter().copied().collect())
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn diagonal_ish() -> SparseMatrix {
        SparseMatrix {
            rows: vec![
                vec![(0, 3.0)],
                vec![(1, 2.0)],
                vec![(2, 1.0)],
                vec![(0, -3.0)],
            ],
            n_cols: 3,
        }
    }

    #[test]
    fn recovers_dominant_directions_in_order() {
        let out = truncated_svd(
            &diagonal_ish(),
            SvdConfig {
                components: 2,
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(out.len(), 4);
        assert!(out.iter().all(|row| row.len() == 2));
        assert!((out[0][0].abs() - 3.0).abs() < 1e-9);
        assert!((out[0][0] + out[3][0]).abs() < 1e-9);
        assert!((out[1][1] - 2.0).abs() < 1e-9);
        assert!(out[2][0].abs() < 1e-9 && out[2][1].abs() < 1e-9);
    }

    #[test]
    fn same_seed_same_output() {
        let config = SvdConfig {
            components: 2,
            ..Default::default()
        };
        assert_eq!(
            truncated_svd(&diagonal_ish(), config).unwrap(),
            truncated_svd(&diagonal_ish(), config).unwrap()
        );
    }

    #[test]
    fn too_many_components_is_rejected() {
        let config = SvdConfig {
            components: 3,
            ..Default::default()
        };
        let err = truncated_svd(&diagonal_ish(), config).unwrap_err();
        assert!(matches!(err, VectorizeError::TooManyComponents { requested: 3, limit: 3 }));
    }

    #[test]
    fn components_are_orthogonal_and_sorted_by_strength() {
        let matrix = SparseMatrix {
            rows: vec![
                vec![(0, 1.0), (1, 2.0)],
                vec![(1, 1.0), (2, 1.0)],
                vec![(0, 2.0), (2, 3.0)],
                vec![(0, 1.0), (1, 1.0), (2, 1.0)],
            ],
            n_cols: 3,
        };
        let out = truncated_svd(
            &matrix,
            SvdConfig {
                components: 2,
                ..Default::default()
            },
        )
        .unwrap();
        let column = |c: usize| out.iter().map(|row| row[c]).collect::<Vec<f64>>();
        let dot = |a: &[f64], b: &[f64]| a.iter().zip(b).map(|(x, y)| x * y).sum::<f64>();
        let (first, second) = (column(0), column(1));
        assert!(dot(&first, &second).abs() < 1e-9);
        assert!(dot(&first, &first) >= dot(&second, &second));
    }
}
