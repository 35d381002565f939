use ndhistogram::{axis::Variable, ndhistogram, value::WeightedSum, Histogram};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Bin boundaries of a one-dimensional histogram
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(untagged)]
pub enum Binning {
    /// `nbins` bins of equal width between `xmin` and `xmax`
    Uniform { nbins: usize, xmin: f64, xmax: f64 },
    /// Explicit bin edges in ascending order
    Variable { edges: Vec<f64> },
}

impl Binning {
    /// The bin edges, after checking that they are valid
    pub fn edges(&self) -> Result<Vec<f64>, HistError> {
        match self {
            Binning::Uniform { nbins, xmin, xmax } => {
                if *nbins == 0 {
                    return Err(HistError::InvalidBinning(
                        "number of bins is zero".to_owned(),
                    ));
                }
                if !(xmax > xmin) {
                    return Err(HistError::InvalidBinning(format!(
                        "upper edge {xmax} not above lower edge {xmin}"
                    )));
                }
                let width = (xmax - xmin) / *nbins as f64;
                let mut edges: Vec<_> =
                    (0..*nbins).map(|i| xmin + i as f64 * width).collect();
                edges.push(*xmax);
                Ok(edges)
            }
            Binning::Variable { edges } => {
                check_edges(edges)?;
                Ok(edges.clone())
            }
        }
    }
}

fn check_edges(edges: &[f64]) -> Result<(), HistError> {
    if edges.len() < 2 {
        return Err(HistError::InvalidBinning(
            "need at least two bin edges".to_owned(),
        ));
    }
    if edges.iter().any(|e| !e.is_finite()) {
        return Err(HistError::InvalidBinning(
            "bin edges have to be finite".to_owned(),
        ));
    }
    if edges.windows(2).any(|w| w[0] >= w[1]) {
        return Err(HistError::InvalidBinning(
            "bin edges are not strictly increasing".to_owned(),
        ));
    }
    Ok(())
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum HistError {
    #[error("Invalid binning: {0}")]
    InvalidBinning(String),
    #[error("Cannot add histograms with different binnings")]
    Incompatible,
    #[error("Cannot merge {nbins} bins in groups of {factor}")]
    BadRebinFactor { factor: usize, nbins: usize },
    #[error("New bin edge {0} is not an edge of the original histogram")]
    BadRebinEdge(f64),
}

/// Weighted one-dimensional histogram
///
/// Besides the regular bins the histogram keeps track of the weights
/// below the first edge (underflow) and at or above the last edge
/// (overflow). Statistical errors are the square roots of the sums of
/// squared weights.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
pub struct Hist1D {
    edges: Vec<f64>,
    sumw: Vec<f64>,
    sumw2: Vec<f64>,
    underflow: [f64; 2],
    overflow: [f64; 2],
    entries: u64,
}

impl Hist1D {
    /// Empty histogram with the given binning
    pub fn new(binning: &Binning) -> Result<Self, HistError> {
        Ok(Self::from_checked_edges(binning.edges()?))
    }

    /// Empty histogram with `nbins` equal-width bins
    pub fn uniform(nbins: usize, xmin: f64, xmax: f64) -> Result<Self, HistError> {
        Self::new(&Binning::Uniform { nbins, xmin, xmax })
    }

    /// Empty histogram with the given bin edges
    pub fn with_edges(edges: Vec<f64>) -> Result<Self, HistError> {
        check_edges(&edges)?;
        Ok(Self::from_checked_edges(edges))
    }

    fn from_checked_edges(edges: Vec<f64>) -> Self {
        let nbins = edges.len() - 1;
        Self {
            edges,
            sumw: vec![0.; nbins],
            sumw2: vec![0.; nbins],
            underflow: [0.; 2],
            overflow: [0.; 2],
            entries: 0,
        }
    }

    /// Empty histogram with the same binning
    pub fn empty_like(&self) -> Self {
        Self::from_checked_edges(self.edges.clone())
    }

    pub fn nbins(&self) -> usize {
        self.sumw.len()
    }

    pub fn edges(&self) -> &[f64] {
        &self.edges
    }

    /// Sums of weights in the regular bins
    pub fn contents(&self) -> &[f64] {
        &self.sumw
    }

    /// Sums of squared weights in the regular bins
    pub fn sumw2(&self) -> &[f64] {
        &self.sumw2
    }

    pub fn content(&self, bin: usize) -> f64 {
        self.sumw[bin]
    }

    /// Statistical error of the given bin
    pub fn error(&self, bin: usize) -> f64 {
        self.sumw2[bin].sqrt()
    }

    pub fn errors(&self) -> impl Iterator<Item = f64> + '_ {
        self.sumw2.iter().map(|w2| w2.sqrt())
    }

    pub fn bin_low_edge(&self, bin: usize) -> f64 {
        self.edges[bin]
    }

    pub fn bin_high_edge(&self, bin: usize) -> f64 {
        self.edges[bin + 1]
    }

    pub fn bin_centre(&self, bin: usize) -> f64 {
        0.5 * (self.edges[bin] + self.edges[bin + 1])
    }

    pub fn underflow(&self) -> f64 {
        self.underflow[0]
    }

    pub fn overflow(&self) -> f64 {
        self.overflow[0]
    }

    /// Number of fill calls with a number argument
    pub fn entries(&self) -> u64 {
        self.entries
    }

    /// Add `weight` to the bin containing `x`
    ///
    /// NaN values are ignored.
    pub fn fill(&mut self, x: f64, weight: f64) {
        self.fill_many([(x, weight)])
    }

    /// Fill all `(x, weight)` pairs
    ///
    /// NaN values of `x` are ignored.
    pub fn fill_many<I>(&mut self, values: I)
    where
        I: IntoIterator<Item = (f64, f64)>,
    {
        let mut filled =
            ndhistogram!(Variable::new(self.edges.clone()); WeightedSum<f64>);
        for (x, weight) in values {
            if x.is_nan() {
                continue;
            }
            filled.fill_with(&x, weight);
            self.entries += 1;
        }
        // index 0 is the underflow and nbins + 1 the overflow
        let nbins = self.nbins();
        for item in filled.iter() {
            let (w, w2) = (item.value.get(), item.value.variance());
            let target = match item.index {
                0 => &mut self.underflow,
                bin if bin <= nbins => {
                    self.sumw[bin - 1] += w;
                    self.sumw2[bin - 1] += w2;
                    continue;
                }
                _ => &mut self.overflow,
            };
            target[0] += w;
            target[1] += w2;
        }
    }

    /// Add the contents of another histogram with identical binning
    pub fn add(&mut self, other: &Hist1D) -> Result<(), HistError> {
        if self.edges != other.edges {
            return Err(HistError::Incompatible);
        }
        for (w, o) in self.sumw.iter_mut().zip(&other.sumw) {
            *w += o;
        }
        for (w2, o) in self.sumw2.iter_mut().zip(&other.sumw2) {
            *w2 += o;
        }
        for i in 0..2 {
            self.underflow[i] += other.underflow[i];
            self.overflow[i] += other.overflow[i];
        }
        self.entries += other.entries;
        Ok(())
    }

    /// Multiply all weights by `factor`
    ///
    /// Squared weights are multiplied by `factor^2`.
    pub fn scale(&mut self, factor: f64) {
        let factor2 = factor * factor;
        self.sumw.iter_mut().for_each(|w| *w *= factor);
        self.sumw2.iter_mut().for_each(|w2| *w2 *= factor2);
        self.underflow[0] *= factor;
        self.underflow[1] *= factor2;
        self.overflow[0] *= factor;
        self.overflow[1] *= factor2;
    }

    /// Sum of weights in the regular bins
    pub fn integral(&self) -> f64 {
        self.sumw.iter().sum()
    }

    /// Largest bin content
    pub fn max_content(&self) -> f64 {
        self.sumw.iter().copied().fold(f64::NEG_INFINITY, f64::max)
    }

    /// Largest bin content plus its error
    pub fn max_with_error(&self) -> f64 {
        self.sumw
            .iter()
            .zip(self.errors())
            .map(|(w, err)| w + err)
            .fold(f64::NEG_INFINITY, f64::max)
    }

    /// Smallest bin content
    pub fn min_content(&self) -> f64 {
        self.sumw.iter().copied().fold(f64::INFINITY, f64::min)
    }

    /// Smallest strictly positive bin content
    pub fn min_positive(&self) -> Option<f64> {
        self.sumw
            .iter()
            .copied()
            .filter(|w| *w > 0.)
            .reduce(f64::min)
    }

    /// Histogram scaled to unit integral
    ///
    /// Histograms with vanishing integral are returned unchanged.
    pub fn normalized(&self) -> Self {
        let mut res = self.clone();
        let integral = self.integral();
        if integral != 0. {
            res.scale(1. / integral);
        }
        res
    }

    /// Move the overflow into the last regular bin
    pub fn fold_overflow(&mut self) {
        let last = self.nbins() - 1;
        self.sumw[last] += self.overflow[0];
        self.sumw2[last] += self.overflow[1];
        self.overflow = [0.; 2];
    }

    /// Merge groups of `factor` neighbouring bins
    ///
    /// `factor` has to divide the number of bins.
    pub fn rebin(&self, factor: usize) -> Result<Self, HistError> {
        let nbins = self.nbins();
        if factor == 0 || nbins % factor != 0 {
            return Err(HistError::BadRebinFactor { factor, nbins });
        }
        let edges = self.edges.iter().copied().step_by(factor).collect();
        self.rebin_edges(edges)
    }

    /// Merge bins such that the new histogram has the given edges
    ///
    /// Every new edge has to be an edge of this histogram. Contents
    /// outside the new range move to the underflow and overflow.
    pub fn rebin_edges(&self, edges: Vec<f64>) -> Result<Self, HistError> {
        check_edges(&edges)?;
        if let Some(e) = edges.iter().find(|e| !self.edges.contains(e)) {
            return Err(HistError::BadRebinEdge(*e));
        }
        let mut res = Self::from_checked_edges(edges);
        res.underflow = self.underflow;
        res.overflow = self.overflow;
        res.entries = self.entries;
        let xmin = res.edges[0];
        let xmax = res.edges[res.edges.len() - 1];
        for bin in 0..self.nbins() {
            let (w, w2) = (self.sumw[bin], self.sumw2[bin]);
            let low = self.edges[bin];
            let target = if low < xmin {
                &mut res.underflow
            } else if low >= xmax {
                &mut res.overflow
            } else {
                let new_bin = res.edges.partition_point(|e| *e <= low) - 1;
                res.sumw[new_bin] += w;
                res.sumw2[new_bin] += w2;
                continue;
            };
            target[0] += w;
            target[1] += w2;
        }
        Ok(res)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fill() {
        let mut hist = Hist1D::uniform(4, 0., 4.).unwrap();
        assert_eq!(hist.edges(), &[0., 1., 2., 3., 4.]);
        hist.fill(0.5, 2.);
        hist.fill(1., 1.);
        hist.fill(3.999, 1.);
        hist.fill(4., 3.);
        hist.fill(-1., 5.);
        hist.fill(f64::NAN, 100.);
        assert_eq!(hist.contents(), &[2., 1., 0., 1.]);
        assert_eq!(hist.sumw2(), &[4., 1., 0., 1.]);
        assert_eq!(hist.underflow(), 5.);
        assert_eq!(hist.overflow(), 3.);
        assert_eq!(hist.entries(), 5);
        assert_eq!(hist.integral(), 4.);
        assert_eq!(hist.max_content(), 2.);
        assert_eq!(hist.max_with_error(), 4.);
        assert_eq!(hist.min_positive(), Some(1.));

        hist.fold_overflow();
        assert_eq!(hist.contents(), &[2., 1., 0., 4.]);
        assert_eq!(hist.overflow(), 0.);
    }

    #[test]
    fn scale_and_add() {
        let mut a = Hist1D::with_edges(vec![0., 1., 3.]).unwrap();
        a.fill(2., 1.);
        a.fill(2., 1.);
        let mut b = a.clone();
        b.scale(3.);
        assert_eq!(b.contents(), &[0., 6.]);
        assert_eq!(b.sumw2(), &[0., 18.]);
        a.add(&b).unwrap();
        assert_eq!(a.contents(), &[0., 8.]);
        assert_eq!(a.sumw2(), &[0., 20.]);

        let c = Hist1D::uniform(2, 0., 3.).unwrap();
        assert_eq!(a.add(&c), Err(HistError::Incompatible));

        let norm = a.normalized();
        assert_eq!(norm.integral(), 1.);
        assert_eq!(c.normalized(), c);
    }

    #[test]
    fn invalid_binning() {
        assert!(Hist1D::uniform(0, 0., 1.).is_err());
        assert!(Hist1D::uniform(3, 1., 1.).is_err());
        assert!(Hist1D::with_edges(vec![0., 2., 1.]).is_err());
        assert!(Hist1D::with_edges(vec![0.]).is_err());
    }

    #[test]
    fn rebin() {
        let mut hist = Hist1D::uniform(6, 0., 6.).unwrap();
        for x in 0..6 {
            hist.fill(x as f64 + 0.5, (x + 1) as f64);
        }
        let merged = hist.rebin(2).unwrap();
        assert_eq!(merged.edges(), &[0., 2., 4., 6.]);
        assert_eq!(merged.contents(), &[3., 7., 11.]);
        assert_eq!(merged.sumw2(), &[5., 25., 61.]);
        assert_eq!(
            hist.rebin(4),
            Err(HistError::BadRebinFactor { factor: 4, nbins: 6 })
        );

        let merged = hist.rebin_edges(vec![1., 2., 5.]).unwrap();
        assert_eq!(merged.contents(), &[2., 12.]);
        assert_eq!(merged.underflow(), 1.);
        assert_eq!(merged.overflow(), 6.);
        assert_eq!(
            hist.rebin_edges(vec![0., 2.5]),
            Err(HistError::BadRebinEdge(2.5))
        );
    }

    #[test]
    fn binning_from_config() {
        let uniform: Binning =
            serde_json::from_str(r#"{"nbins": 2, "xmin": 0, "xmax": 1}"#).unwrap();
        assert_eq!(uniform.edges().unwrap(), vec![0., 0.5, 1.]);
        let variable: Binning =
            serde_json::from_str(r#"{"edges": [0, 10, 50]}"#).unwrap();
        assert_eq!(variable.edges().unwrap(), vec![0., 10., 50.]);
    }
}
