use crate::error::{CampaignError, Result};
use std::collections::{BTreeMap, HashMap};

/// AMDAPP benchmarks shipped with the simulator and the total number of
/// simulated cycles of their fault-free run, where it has been measured.
const BUILTIN: [(&str, Option<u64>); 19] = [
    ("BinarySearch", Some(121_379)),
    ("BinomialOption", None),
    ("BitonicSort", Some(130_746_167)),
    ("BlackScholes", None),
    ("BoxFilter", None),
    ("DCT", Some(4_007_505)),
    ("DwtHaar1D", Some(229_577)),
    ("FastWalshTransform", Some(6_835_898)),
    ("FloydWarshall", None),
    ("Histogram", Some(806_711)),
    ("MatrixMultiplication", Some(1_240_173)),
    ("MatrixTranspose", Some(21_452_807)),
    ("PrefixSum", Some(21_957)),
    ("RadixSort", Some(1_782_844)),
    ("RecursiveGaussian", None),
    ("Reduction", Some(5_688_353)),
    ("ScanLargeArrays", Some(7_482_865)),
    ("SobelFilter", None),
    ("URNG", Some(19_416_717)),
];

/// Selector for every benchmark of the catalog.
pub const ALL_BENCHMARKS: &str = "all";

/// Benchmark names with their cycle bounds.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BenchmarkCatalog {
    bounds: BTreeMap<String, Option<u64>>,
}

impl Default for BenchmarkCatalog {
    fn default() -> Self {
        Self::builtin()
    }
}

impl BenchmarkCatalog {
    pub fn builtin() -> Self {
        Self {
            bounds: BUILTIN
                .iter()
                .map(|(name, bound)| (name.to_string(), *bound))
                .collect(),
        }
    }

    /// Set or add cycle bounds, e.g. from the configuration file.
    pub fn with_overrides(mut self, overrides: &HashMap<String, u64>) -> Self {
        for (name, bound) in overrides {
            self.bounds.insert(name.clone(), Some(*bound));
        }
        self
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.bounds.keys().map(String::as_str)
    }

    /// Cycle bound of `name`, `None` when the benchmark is known but unmeasured.
    pub fn cycle_bound(&self, name: &str) -> Result<Option<u64>> {
        self.bounds
            .get(name)
            .copied()
            .ok_or_else(|| CampaignError::UnknownBenchmark(name.to_string()))
    }

    /// Resolve a benchmark name or [`ALL_BENCHMARKS`] to the benchmarks it covers.
    pub fn select(&self, selector: &str) -> Result<Vec<(String, Option<u64>)>> {
        if selector == ALL_BENCHMARKS {
            return Ok(self
                .bounds
                .iter()
                .map(|(name, bound)| (name.clone(), *bound))
                .collect());
        }
        let bound = self.cycle_bound(selector)?;
        Ok(vec![(selector.to_string(), bound)])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_bounds() {
        let catalog = BenchmarkCatalog::builtin();
        assert_eq!(catalog.names().count(), 19);
        assert_eq!(catalog.cycle_bound("PrefixSum").unwrap(), Some(21_957));
        assert_eq!(catalog.cycle_bound("BinomialOption").unwrap(), None);
        assert!(matches!(
            catalog.cycle_bound("Nope"),
            Err(CampaignError::UnknownBenchmark(name)) if name == "Nope"
        ));
    }

    #[test]
    fn overrides_fill_missing_bounds() {
        let overrides = HashMap::from([
            ("BinomialOption".to_string(), 5_000),
            ("MyKernel".to_string(), 900),
        ]);
        let catalog = BenchmarkCatalog::builtin().with_overrides(&overrides);
        assert_eq!(catalog.cycle_bound("BinomialOption").unwrap(), Some(5_000));
        assert_eq!(catalog.select("MyKernel").unwrap(), vec![("MyKernel".to_string(), Some(900))]);
        assert_eq!(catalog.select(ALL_BENCHMARKS).unwrap().len(), 20);
    }
}
