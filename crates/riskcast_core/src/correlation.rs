//! Correlation structure between risks.
//!
//! Dependencies are imposed with a Gaussian copula: independent standard
//! normals `z` are mixed through the lower Cholesky factor `L` of the
//! correlation matrix (`y = L z`) and each component is then pushed through
//! its risk's marginal inverse CDF. Marginals are preserved exactly; the
//! rank correlation of the outputs follows the matrix.

use serde::{Deserialize, Serialize};

use crate::analysis::pearson;
use crate::error::{CorrelationError, MatrixProperty};
use crate::model::Risk;

/// Shrinkage increments tried when repairing a dependency-derived matrix
const DEPENDENCY_REPAIR_STEPS: usize = 100;

const SYMMETRY_TOLERANCE: f64 = 1e-9;
const DIAGONAL_TOLERANCE: f64 = 1e-9;
/// Pivots within this of zero are treated as semi-definite (zero column)
const PIVOT_TOLERANCE: f64 = 1e-10;
/// Residual allowed below a zero pivot before the matrix is rejected
const RESIDUAL_TOLERANCE: f64 = 1e-8;

/// Symmetric N x N correlation matrix in row-major order.
///
/// Row/column `i` corresponds to the `i`-th risk of the config it is
/// attached to. Deserializes from (and serializes to) a list of rows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<Vec<f64>>", into = "Vec<Vec<f64>>")]
pub struct CorrelationMatrix {
    size: usize,
    values: Vec<f64>,
}

impl CorrelationMatrix {
    /// Build from rows. Only the shape is checked here; call
    /// [`validate`](Self::validate) for the correlation properties.
    pub fn new(rows: Vec<Vec<f64>>) -> Result<Self, CorrelationError> {
        let size = rows.len();
        let mut values = Vec::with_capacity(size * size);
        for (row, entries) in rows.into_iter().enumerate() {
            if entries.len() != size {
                return Err(MatrixProperty::NotSquare {
                    rows: size,
                    row,
                    len: entries.len(),
                }
                .into());
            }
            values.extend(entries);
        }
        Ok(Self { size, values })
    }

    #[must_use]
    pub fn identity(size: usize) -> Self {
        let mut values = vec![0.0; size * size];
        for i in 0..size {
            values[i * size + i] = 1.0;
        }
        Self { size, values }
    }

    /// Matrix with `coefficient` between every pair of risks linked by
    /// `correlation_dependencies` (in either direction). Dependencies on ids
    /// not present in `risks` are ignored.
    ///
    /// Dense dependency graphs at high coefficients are usually not positive
    /// semi-definite; such matrices are shrunk toward the identity with
    /// [`nearest_valid`](Self::nearest_valid) until they factor. Other
    /// defects (a coefficient outside [-1, 1]) are left for validation.
    #[must_use]
    pub fn from_dependencies(risks: &[Risk], coefficient: f64) -> Self {
        let matrix = Self::linked(risks, coefficient);
        let Err(CorrelationError::InvalidCorrelationMatrix(
            MatrixProperty::NotPositiveSemiDefinite { pivot, value },
        )) = matrix.cholesky()
        else {
            return matrix;
        };
        match matrix.nearest_valid(DEPENDENCY_REPAIR_STEPS) {
            Ok((repaired, shrinkage)) => {
                tracing::warn!(
                    coefficient,
                    pivot,
                    value,
                    shrinkage,
                    "dependency correlation not positive semi-definite, shrunk toward identity"
                );
                repaired
            }
            Err(_) => matrix,
        }
    }

    fn linked(risks: &[Risk], coefficient: f64) -> Self {
        let mut matrix = Self::identity(risks.len());
        for (i, risk) in risks.iter().enumerate() {
            for dep in &risk.correlation_dependencies {
                match risks.iter().position(|r| r.id == *dep) {
                    Some(j) if j != i => matrix.set(i, j, coefficient),
                    Some(_) => {}
                    None => tracing::debug!(risk = %risk.id, dependency = %dep, "dependency not in risk set"),
                }
            }
        }
        matrix
    }

    /// Sample correlation matrix of equally long columns
    #[must_use]
    pub fn empirical(columns: &[&[f64]]) -> Self {
        let mut matrix = Self::identity(columns.len());
        for i in 0..columns.len() {
            for j in (i + 1)..columns.len() {
                matrix.set(i, j, pearson(columns[i], columns[j]));
            }
        }
        matrix
    }

    #[must_use]
    pub fn size(&self) -> usize {
        self.size
    }

    #[inline]
    #[must_use]
    pub fn get(&self, row: usize, col: usize) -> f64 {
        self.values[row * self.size + col]
    }

    /// Set a symmetric pair of entries
    pub fn set(&mut self, row: usize, col: usize, value: f64) {
        self.values[row * self.size + col] = value;
        self.values[col * self.size + row] = value;
    }

    #[must_use]
    pub fn row(&self, row: usize) -> &[f64] {
        &self.values[row * self.size..(row + 1) * self.size]
    }

    #[must_use]
    pub fn is_identity(&self) -> bool {
        (0..self.size).all(|i| {
            (0..self.size).all(|j| self.get(i, j) == if i == j { 1.0 } else { 0.0 })
        })
    }

    /// Copy with row and column `index` removed
    #[must_use]
    pub fn without(&self, index: usize) -> Self {
        let size = self.size.saturating_sub(1);
        let keep: Vec<usize> = (0..self.size).filter(|&i| i != index).collect();
        let values = keep
            .iter()
            .flat_map(|&i| keep.iter().map(move |&j| (i, j)))
            .map(|(i, j)| self.get(i, j))
            .collect();
        Self { size, values }
    }

    /// Check symmetry, unit diagonal, range and positive semi-definiteness
    pub fn validate(&self) -> Result<(), CorrelationError> {
        self.cholesky().map(|_| ())
    }

    /// [`validate`](Self::validate) plus a dimension check against the risk count
    pub fn validate_for(&self, risk_count: usize) -> Result<(), CorrelationError> {
        if self.size != risk_count {
            return Err(MatrixProperty::DimensionMismatch {
                expected: risk_count,
                actual: self.size,
            }
            .into());
        }
        self.validate()
    }

    fn check_entries(&self) -> Result<(), MatrixProperty> {
        let n = self.size;
        for row in 0..n {
            for col in 0..n {
                let value = self.get(row, col);
                if !value.is_finite() {
                    return Err(MatrixProperty::NotFinite { row, col });
                }
                if row == col {
                    if (value - 1.0).abs() > DIAGONAL_TOLERANCE {
                        return Err(MatrixProperty::NonUnitDiagonal { index: row, value });
                    }
                    continue;
                }
                if !(-1.0..=1.0).contains(&value) {
                    return Err(MatrixProperty::OutOfRange { row, col, value });
                }
                if col > row && (value - self.get(col, row)).abs() > SYMMETRY_TOLERANCE {
                    return Err(MatrixProperty::Asymmetric { row, col });
                }
            }
        }
        Ok(())
    }

    /// Validate and factor into `L` with `L Lᵀ = C`.
    ///
    /// Zero pivots (within tolerance) are accepted and yield zero columns, so
    /// perfectly correlated risks are supported.
    pub fn cholesky(&self) -> Result<CholeskyFactor, CorrelationError> {
        self.check_entries()?;

        let n = self.size;
        let mut lower = vec![0.0; n * n];
        for j in 0..n {
            let mut pivot = self.get(j, j);
            for k in 0..j {
                pivot -= lower[j * n + k] * lower[j * n + k];
            }
            if pivot < -PIVOT_TOLERANCE {
                return Err(MatrixProperty::NotPositiveSemiDefinite { pivot: j, value: pivot }.into());
            }

            if pivot <= PIVOT_TOLERANCE {
                // Semi-definite: the rest of the column must already be explained
                for i in (j + 1)..n {
                    let mut residual = self.get(i, j);
                    for k in 0..j {
                        residual -= lower[i * n + k] * lower[j * n + k];
                    }
                    if residual.abs() > RESIDUAL_TOLERANCE {
                        return Err(MatrixProperty::NotPositiveSemiDefinite {
                            pivot: j,
                            value: pivot,
                        }
                        .into());
                    }
                }
                continue;
            }

            let diag = pivot.sqrt();
            lower[j * n + j] = diag;
            for i in (j + 1)..n {
                let mut sum = self.get(i, j);
                for k in 0..j {
                    sum -= lower[i * n + k] * lower[j * n + k];
                }
                lower[i * n + j] = sum / diag;
            }
        }

        Ok(CholeskyFactor { size: n, lower })
    }

    /// Shrink toward the identity: `(1 - λ) C + λ I`
    #[must_use]
    pub fn regularized(&self, shrinkage: f64) -> Self {
        let lambda = shrinkage.clamp(0.0, 1.0);
        let mut out = self.clone();
        for i in 0..self.size {
            for j in 0..self.size {
                if i != j {
                    out.values[i * self.size + j] = (1.0 - lambda) * self.get(i, j);
                }
            }
        }
        out
    }

    /// Smallest shrinkage (in `steps` increments) that makes the matrix
    /// factorable, after symmetrising, clamping to [-1, 1] and resetting the
    /// diagonal. Returns the repaired matrix and the shrinkage applied.
    pub fn nearest_valid(&self, steps: usize) -> Result<(Self, f64), CorrelationError> {
        let n = self.size;
        let mut base = Self::identity(n);
        for i in 0..n {
            for j in (i + 1)..n {
                let (a, b) = (self.get(i, j), self.get(j, i));
                if !a.is_finite() || !b.is_finite() {
                    let (row, col) = if a.is_finite() { (j, i) } else { (i, j) };
                    return Err(MatrixProperty::NotFinite { row, col }.into());
                }
                base.set(i, j, ((a + b) / 2.0).clamp(-1.0, 1.0));
            }
        }

        let steps = steps.max(1);
        for k in 0..=steps {
            let lambda = k as f64 / steps as f64;
            let candidate = base.regularized(lambda);
            if candidate.cholesky().is_ok() {
                if k > 0 {
                    tracing::debug!(shrinkage = lambda, "correlation matrix repaired");
                }
                return Ok((candidate, lambda));
            }
        }
        // λ = 1 is the identity, which always factors
        Ok((Self::identity(n), 1.0))
    }
}

impl TryFrom<Vec<Vec<f64>>> for CorrelationMatrix {
    type Error = CorrelationError;

    fn try_from(rows: Vec<Vec<f64>>) -> Result<Self, Self::Error> {
        Self::new(rows)
    }
}

impl From<CorrelationMatrix> for Vec<Vec<f64>> {
    fn from(matrix: CorrelationMatrix) -> Self {
        if matrix.size == 0 {
            return Vec::new();
        }
        matrix
            .values
            .chunks(matrix.size)
            .map(<[f64]>::to_vec)
            .collect()
    }
}

/// Lower-triangular Cholesky factor, row-major
#[derive(Debug, Clone, PartialEq)]
pub struct CholeskyFactor {
    size: usize,
    lower: Vec<f64>,
}

impl CholeskyFactor {
    #[must_use]
    pub fn size(&self) -> usize {
        self.size
    }

    #[inline]
    #[must_use]
    pub fn get(&self, row: usize, col: usize) -> f64 {
        self.lower[row * self.size + col]
    }

    /// `out = L z` for independent standard normals `z`
    #[inline]
    pub fn correlate(&self, z: &[f64], out: &mut [f64]) {
        debug_assert_eq!(z.len(), self.size);
        debug_assert_eq!(out.len(), self.size);
        for (i, slot) in out.iter_mut().enumerate() {
            let row = &self.lower[i * self.size..i * self.size + i + 1];
            *slot = row.iter().zip(z).map(|(l, z)| l * z).sum();
        }
    }

    /// `L Lᵀ`, the matrix this factor reproduces
    #[must_use]
    pub fn reconstruct(&self) -> CorrelationMatrix {
        let n = self.size;
        let mut values = vec![0.0; n * n];
        for i in 0..n {
            for j in 0..n {
                values[i * n + j] = (0..=i.min(j)).map(|k| self.get(i, k) * self.get(j, k)).sum();
            }
        }
        CorrelationMatrix { size: n, values }
    }
}

/// Pearson correlation of two sample series
#[must_use]
pub fn empirical_correlation(x: &[f64], y: &[f64]) -> f64 {
    pearson(x, y)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matrix(rows: &[&[f64]]) -> CorrelationMatrix {
        CorrelationMatrix::new(rows.iter().map(|r| r.to_vec()).collect()).unwrap()
    }

    fn property(err: CorrelationError) -> MatrixProperty {
        let CorrelationError::InvalidCorrelationMatrix(p) = err;
        p
    }

    #[test]
    fn test_rejects_non_square() {
        let err = CorrelationMatrix::new(vec![vec![1.0, 0.0], vec![0.0]]).unwrap_err();
        assert_eq!(
            property(err),
            MatrixProperty::NotSquare {
                rows: 2,
                row: 1,
                len: 1
            }
        );
    }

    #[test]
    fn test_rejects_each_property() {
        let asym = matrix(&[&[1.0, 0.5], &[0.4, 1.0]]);
        assert_eq!(
            property(asym.validate().unwrap_err()),
            MatrixProperty::Asymmetric { row: 0, col: 1 }
        );

        let diag = matrix(&[&[1.0, 0.0], &[0.0, 0.9]]);
        assert!(matches!(
            property(diag.validate().unwrap_err()),
            MatrixProperty::NonUnitDiagonal { index: 1, .. }
        ));

        let range = matrix(&[&[1.0, 1.2], &[1.2, 1.0]]);
        assert!(matches!(
            property(range.validate().unwrap_err()),
            MatrixProperty::OutOfRange { row: 0, col: 1, .. }
        ));

        let nan = matrix(&[&[1.0, f64::NAN], &[f64::NAN, 1.0]]);
        assert_eq!(
            property(nan.validate().unwrap_err()),
            MatrixProperty::NotFinite { row: 0, col: 1 }
        );
    }

    #[test]
    fn test_rejects_indefinite_matrix() {
        // Pairwise plausible but jointly impossible
        let bad = matrix(&[&[1.0, 0.9, 0.9], &[0.9, 1.0, -0.9], &[0.9, -0.9, 1.0]]);
        assert!(matches!(
            property(bad.validate().unwrap_err()),
            MatrixProperty::NotPositiveSemiDefinite { pivot: 2, .. }
        ));
    }

    #[test]
    fn test_dimension_mismatch() {
        let m = CorrelationMatrix::identity(3);
        assert_eq!(
            property(m.validate_for(2).unwrap_err()),
            MatrixProperty::DimensionMismatch {
                expected: 2,
                actual: 3
            }
        );
        assert!(m.validate_for(3).is_ok());
    }

    #[test]
    fn test_cholesky_reconstructs_matrix() {
        let m = matrix(&[&[1.0, 0.6, 0.3], &[0.6, 1.0, 0.2], &[0.3, 0.2, 1.0]]);
        let rebuilt = m.cholesky().unwrap().reconstruct();
        for i in 0..3 {
            for j in 0..3 {
                assert!((rebuilt.get(i, j) - m.get(i, j)).abs() < 1e-12);
            }
        }
    }

    #[test]
    fn test_perfect_correlation_is_semi_definite() {
        let m = matrix(&[&[1.0, 1.0], &[1.0, 1.0]]);
        let factor = m.cholesky().unwrap();
        assert_eq!(factor.get(1, 1), 0.0);

        let mut out = [0.0; 2];
        factor.correlate(&[0.7, -3.0], &mut out);
        assert_eq!(out, [0.7, 0.7]);
    }

    #[test]
    fn test_nearest_valid_repairs_indefinite_matrix() {
        let bad = matrix(&[&[1.0, 0.9, 0.9], &[0.9, 1.0, -0.9], &[0.9, -0.9, 1.0]]);
        let (fixed, shrinkage) = bad.nearest_valid(20).unwrap();
        assert!(shrinkage > 0.0 && shrinkage < 1.0);
        assert!(fixed.validate().is_ok());

        let good = CorrelationMatrix::identity(2);
        assert_eq!(good.nearest_valid(20).unwrap().1, 0.0);
    }

    #[test]
    fn test_from_dependencies_links_both_directions() {
        use crate::model::{ImpactType, RiskDistribution, RiskId};
        let dist = RiskDistribution::Uniform { min: 0.0, max: 1.0 };
        let risks = vec![
            Risk::new(RiskId(1), "a", ImpactType::Cost, dist),
            Risk::new(RiskId(2), "b", ImpactType::Cost, dist).depends_on(RiskId(1)),
            Risk::new(RiskId(3), "c", ImpactType::Cost, dist).depends_on(RiskId(99)),
        ];
        let m = CorrelationMatrix::from_dependencies(&risks, 0.5);
        assert_eq!(m.get(0, 1), 0.5);
        assert_eq!(m.get(1, 0), 0.5);
        assert_eq!(m.get(0, 2), 0.0);
        assert!(m.validate().is_ok());
    }

    #[test]
    fn test_from_dependencies_repairs_dense_graph() {
        use crate::model::{ImpactType, RiskDistribution, RiskId};
        let dist = RiskDistribution::Uniform { min: 0.0, max: 1.0 };
        let hub = Risk::new(RiskId(1), "hub", ImpactType::Cost, dist);
        let spoke = |id| Risk::new(RiskId(id), "spoke", ImpactType::Cost, dist).depends_on(RiskId(1));
        let risks = vec![hub, spoke(2), spoke(3), spoke(4)];

        assert!(CorrelationMatrix::linked(&risks, 0.9).validate().is_err());

        let m = CorrelationMatrix::from_dependencies(&risks, 0.9);
        assert!(m.validate_for(4).is_ok());
        for j in 1..4 {
            assert!(m.get(0, j) > 0.4 && m.get(0, j) < 0.9);
            assert_eq!(m.get(0, j), m.get(0, 1));
        }
        assert_eq!(m.get(1, 2), 0.0);
    }

    #[test]
    fn test_from_dependencies_leaves_out_of_range_for_validation() {
        use crate::model::{ImpactType, RiskDistribution, RiskId};
        let dist = RiskDistribution::Uniform { min: 0.0, max: 1.0 };
        let risks = vec![
            Risk::new(RiskId(1), "a", ImpactType::Cost, dist),
            Risk::new(RiskId(2), "b", ImpactType::Cost, dist).depends_on(RiskId(1)),
        ];
        let m = CorrelationMatrix::from_dependencies(&risks, 1.5);
        assert_eq!(m.get(0, 1), 1.5);
        assert!(m.validate().is_err());
    }

    #[test]
    fn test_without_drops_row_and_column() {
        let m = matrix(&[&[1.0, 0.6, 0.3], &[0.6, 1.0, 0.2], &[0.3, 0.2, 1.0]]);
        let reduced = m.without(1);
        assert_eq!(reduced, matrix(&[&[1.0, 0.3], &[0.3, 1.0]]));
    }

    #[test]
    fn test_serde_as_rows() {
        let m = matrix(&[&[1.0, 0.25], &[0.25, 1.0]]);
        let json = serde_json::to_string(&m).unwrap();
        assert_eq!(json, "[[1.0,0.25],[0.25,1.0]]");
        let back: CorrelationMatrix = serde_json::from_str(&json).unwrap();
        assert_eq!(back, m);
        assert!(serde_json::from_str::<CorrelationMatrix>("[[1.0],[0.0,1.0]]").is_err());
    }
}
