//! Resource vectors — arithmetic over heterogeneous resource dimensions.
//!
//! A [`Resource`] tracks milli-CPU, memory bytes and an open set of named
//! scalar dimensions (GPUs, hugepages, licenses). Comparisons treat an
//! absent scalar as zero, so vectors of different shape compose naturally.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// A resource vector.
///
/// Arithmetic is exact; callers check fit (`less_equal`) before
/// subtracting, the operations themselves never clamp.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    /// CPU in millicores (1000 = one core).
    pub milli_cpu: i64,
    /// Memory in bytes.
    pub memory: i64,
    /// Named scalar dimensions. Sorted map for deterministic iteration.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub scalars: BTreeMap<String, f64>,
}

impl Resource {
    /// The empty vector.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build a vector from millicores and bytes.
    pub fn new(milli_cpu: i64, memory: i64) -> Self {
        Self {
            milli_cpu,
            memory,
            scalars: BTreeMap::new(),
        }
    }

    /// Value of a named scalar dimension, zero when absent.
    pub fn scalar(&self, name: &str) -> f64 {
        self.scalars.get(name).copied().unwrap_or(0.0)
    }

    /// Set a named scalar dimension.
    pub fn add_scalar(&mut self, name: &str, quantity: f64) {
        self.scalars.insert(name.to_string(), quantity);
    }

    /// Whether the named dimension is zero. `cpu` and `memory` address the
    /// built-in dimensions, everything else a scalar.
    pub fn is_zero(&self, name: &str) -> bool {
        match name {
            "cpu" => self.milli_cpu == 0,
            "memory" => self.memory == 0,
            other => self.scalar(other) == 0.0,
        }
    }

    /// Whether every dimension is zero. Used by backfill to find tasks
    /// with no resource request.
    pub fn is_empty(&self) -> bool {
        self.milli_cpu == 0 && self.memory == 0 && self.scalars.values().all(|v| *v == 0.0)
    }

    /// Add `rhs` into `self`, dimension-wise. Dimensions absent on the
    /// left are created.
    pub fn add(&mut self, rhs: &Resource) -> &mut Self {
        self.milli_cpu += rhs.milli_cpu;
        self.memory += rhs.memory;
        for (name, value) in &rhs.scalars {
            *self.scalars.entry(name.clone()).or_insert(0.0) += value;
        }
        self
    }

    /// Subtract `rhs` from `self`, dimension-wise.
    pub fn sub(&mut self, rhs: &Resource) -> &mut Self {
        self.milli_cpu -= rhs.milli_cpu;
        self.memory -= rhs.memory;
        for (name, value) in &rhs.scalars {
            *self.scalars.entry(name.clone()).or_insert(0.0) -= value;
        }
        self
    }

    /// Raise each dimension of `self` to at least the value in `rhs`.
    pub fn set_max(&mut self, rhs: &Resource) -> &mut Self {
        self.milli_cpu = self.milli_cpu.max(rhs.milli_cpu);
        self.memory = self.memory.max(rhs.memory);
        for (name, value) in &rhs.scalars {
            let entry = self.scalars.entry(name.clone()).or_insert(0.0);
            if *value > *entry {
                *entry = *value;
            }
        }
        self
    }

    /// Scale every dimension by `factor`. Used for weighted queue shares.
    pub fn scaled(&self, factor: f64) -> Resource {
        let mut out = Resource {
            milli_cpu: (self.milli_cpu as f64 * factor) as i64,
            memory: (self.memory as f64 * factor) as i64,
            scalars: BTreeMap::new(),
        };
        for (name, value) in &self.scalars {
            out.scalars.insert(name.clone(), value * factor);
        }
        out
    }

    /// Whether every dimension of `self` is ≤ the matching dimension of
    /// `rhs`. Absent dimensions count as zero on either side.
    pub fn less_equal(&self, rhs: &Resource) -> bool {
        if self.milli_cpu > rhs.milli_cpu || self.memory > rhs.memory {
            return false;
        }
        self.scalars.iter().all(|(name, value)| *value <= rhs.scalar(name))
    }

    /// Whether every dimension of `self` is strictly < the matching
    /// dimension of `rhs`. The zero vector is not less than the zero vector.
    pub fn less(&self, rhs: &Resource) -> bool {
        if self.milli_cpu >= rhs.milli_cpu || self.memory >= rhs.memory {
            return false;
        }
        self.scalars.iter().all(|(name, value)| *value < rhs.scalar(name))
    }
}

impl std::fmt::Display for Resource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "cpu {}m, memory {}", self.milli_cpu, self.memory)?;
        for (name, value) in &self.scalars {
            write!(f, ", {name} {value}")?;
        }
        Ok(())
    }
}
