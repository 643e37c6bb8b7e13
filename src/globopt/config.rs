//! Optimizer configuration
//!
//! Every phase of the optimizer can be switched off independently. The defaults
//! enable everything; the retry protocol turns individual heuristics off when a
//! function cannot be compiled with them.

use serde::{Deserialize, Serialize};
use std::path::Path;

use super::induction_variable::CHANGE_MAGNITUDE_LIMIT_FOR_LOOP_COUNT_BASED_HOISTING;
use crate::error::{Error, RejitReason, Result};

/// Configuration for the global optimizer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GlobOptConfig {
    /// Common subexpression elimination
    pub do_cse: bool,
    /// Copy propagation of stack syms
    pub do_copy_prop: bool,
    /// Replace loads of live fields with copies
    pub do_field_copy_prop: bool,
    /// Hoist loop-invariant field loads into landing pads
    pub do_field_hoisting: bool,
    /// Preload fields written in a loop but live on its back edges
    pub do_field_pre: bool,
    /// Constant folding of int operations and branches
    pub do_const_fold: bool,
    /// Any type specialization at all
    pub do_type_spec: bool,
    /// Int specialization guarded by overflow bailouts
    pub do_aggressive_int_type_spec: bool,
    /// Truncating int conversions for bitwise operators
    pub do_lossy_int_type_spec: bool,
    pub do_float_type_spec: bool,
    pub do_simd_type_spec: bool,
    /// Int specialization of multiplication guarded by overflow bailouts
    pub do_aggressive_mul_int_type_spec: bool,
    /// Int specialization of division when the profile saw int results
    pub do_div_int_type_spec: bool,
    /// Hoist array checks into landing pads
    pub do_array_check_hoist: bool,
    /// Hoist head segment and head segment length loads
    pub do_array_segment_hoist: bool,
    /// Hoist array length loads
    pub do_array_length_hoist: bool,
    pub do_bound_check_elimination: bool,
    pub do_bound_check_hoist: bool,
    pub do_loop_count_based_bound_check_hoist: bool,
    /// Narrow int values along conditional branch edges
    pub do_path_dependent_values: bool,
    /// Rewrite fill and copy loops into bulk memory operations
    pub do_memop: bool,
    pub do_tail_dup: bool,
    /// Remove redundant tagged-value checks on property access bases
    pub do_tag_checks: bool,
    /// Loop prepass fixed-point iteration cap
    pub max_prepass_iterations: u32,
    /// Largest per-iteration change of an induction variable used for loop-count-based hoisting
    pub induction_variable_change_limit: i32,
}

impl Default for GlobOptConfig {
    fn default() -> Self {
        Self {
            do_cse: true,
            do_copy_prop: true,
            do_field_copy_prop: true,
            do_field_hoisting: true,
            do_field_pre: true,
            do_const_fold: true,
            do_type_spec: true,
            do_aggressive_int_type_spec: true,
            do_lossy_int_type_spec: true,
            do_float_type_spec: true,
            do_simd_type_spec: true,
            do_aggressive_mul_int_type_spec: true,
            do_div_int_type_spec: true,
            do_array_check_hoist: true,
            do_array_segment_hoist: true,
            do_array_length_hoist: true,
            do_bound_check_elimination: true,
            do_bound_check_hoist: true,
            do_loop_count_based_bound_check_hoist: true,
            do_path_dependent_values: true,
            do_memop: true,
            do_tail_dup: true,
            do_tag_checks: true,
            max_prepass_iterations: 4,
            induction_variable_change_limit: CHANGE_MAGNITUDE_LIMIT_FOR_LOOP_COUNT_BASED_HOISTING,
        }
    }
}

impl GlobOptConfig {
    /// Everything off: values are still numbered but the IR is left alone
    pub fn disabled() -> Self {
        Self {
            do_cse: false,
            do_copy_prop: false,
            do_field_copy_prop: false,
            do_field_hoisting: false,
            do_field_pre: false,
            do_const_fold: false,
            do_type_spec: false,
            do_aggressive_int_type_spec: false,
            do_lossy_int_type_spec: false,
            do_float_type_spec: false,
            do_simd_type_spec: false,
            do_aggressive_mul_int_type_spec: false,
            do_div_int_type_spec: false,
            do_array_check_hoist: false,
            do_array_segment_hoist: false,
            do_array_length_hoist: false,
            do_bound_check_elimination: false,
            do_bound_check_hoist: false,
            do_loop_count_based_bound_check_hoist: false,
            do_path_dependent_values: false,
            do_memop: false,
            do_tail_dup: false,
            do_tag_checks: false,
            ..Self::default()
        }
    }

    /// Load a configuration from a JSON file. Missing fields keep their defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let config: GlobOptConfig = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the optimizer cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.max_prepass_iterations == 0 {
            return Err(Error::Config(
                "max_prepass_iterations must be at least 1".to_string(),
            ));
        }
        if self.induction_variable_change_limit <= 0 {
            return Err(Error::Config(
                "induction_variable_change_limit must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Switch off the heuristic a rejit names. Returns false if it was already off.
    pub fn disable(&mut self, reason: RejitReason) -> bool {
        let flag = match reason {
            RejitReason::AggressiveIntTypeSpecDisabled => &mut self.do_aggressive_int_type_spec,
            RejitReason::AggressiveMulIntTypeSpecDisabled => {
                &mut self.do_aggressive_mul_int_type_spec
            }
            RejitReason::LossyIntTypeSpecDisabled => &mut self.do_lossy_int_type_spec,
            RejitReason::DivIntTypeSpecDisabled => &mut self.do_div_int_type_spec,
            RejitReason::ArrayCheckHoistDisabled => &mut self.do_array_check_hoist,
            RejitReason::BoundCheckHoistDisabled => &mut self.do_bound_check_hoist,
            RejitReason::MemOpDisabled => &mut self.do_memop,
        };
        std::mem::replace(flag, false)
    }

    pub(crate) fn do_array_opts(&self) -> bool {
        self.do_array_check_hoist || self.do_array_segment_hoist || self.do_array_length_hoist
    }

    pub(crate) fn do_track_relative_int_bounds(&self) -> bool {
        self.do_type_spec && (self.do_bound_check_elimination || self.do_path_dependent_values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_enable_everything() {
        let config = GlobOptConfig::default();
        assert!(config.do_cse);
        assert!(config.do_memop);
        assert_eq!(config.max_prepass_iterations, 4);
        assert_eq!(config.induction_variable_change_limit, 64 << 10);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config: GlobOptConfig = serde_json::from_str(r#"{"do_cse": false}"#).unwrap();
        assert!(!config.do_cse);
        assert!(config.do_copy_prop);
    }

    #[test]
    fn test_zero_iterations_rejected() {
        let config = GlobOptConfig {
            max_prepass_iterations: 0,
            ..GlobOptConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_disable_for_rejit() {
        let mut config = GlobOptConfig::default();
        assert!(config.disable(RejitReason::MemOpDisabled));
        assert!(!config.do_memop);
        assert!(!config.disable(RejitReason::MemOpDisabled));
    }

    #[test]
    fn test_disabled_keeps_limits() {
        let config = GlobOptConfig::disabled();
        assert!(!config.do_type_spec);
        assert_eq!(config.max_prepass_iterations, 4);
    }
}
