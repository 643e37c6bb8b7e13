//! Optimization counters

use std::fmt;

/// What the optimizer did to one function
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct OptStats {
    pub instrs_visited: usize,
    pub prepass_iterations: usize,
    /// Loops whose prepass hit the iteration cap and fell back to pessimistic values
    pub pessimistic_loops: usize,
    pub copy_props: usize,
    pub field_copy_props: usize,
    pub cse: usize,
    pub const_folds: usize,
    pub branches_folded: usize,
    pub int_specialized: usize,
    pub float_specialized: usize,
    pub simd_specialized: usize,
    pub conversions: usize,
    pub compensations: usize,
    pub bailouts_added: usize,
    pub tag_checks_removed: usize,
    pub type_checks_removed: usize,
    pub fields_hoisted: usize,
    pub fields_preloaded: usize,
    pub array_checks_hoisted: usize,
    pub array_loads_hoisted: usize,
    pub bound_checks_eliminated: usize,
    pub bound_checks_hoisted: usize,
    pub memops: usize,
    pub dead_stores: usize,
    pub tail_duplicated: usize,
}

impl fmt::Display for OptStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "instructions visited     {}", self.instrs_visited)?;
        writeln!(
            f,
            "prepass iterations       {} ({} pessimistic)",
            self.prepass_iterations, self.pessimistic_loops
        )?;
        writeln!(
            f,
            "copy props               {} (+{} fields)",
            self.copy_props, self.field_copy_props
        )?;
        writeln!(f, "cse                      {}", self.cse)?;
        writeln!(
            f,
            "constant folds           {} (+{} branches)",
            self.const_folds, self.branches_folded
        )?;
        writeln!(
            f,
            "specialized int/f64/simd {}/{}/{}",
            self.int_specialized, self.float_specialized, self.simd_specialized
        )?;
        writeln!(
            f,
            "conversions              {} (+{} compensation)",
            self.conversions, self.compensations
        )?;
        writeln!(f, "bailouts added           {}", self.bailouts_added)?;
        writeln!(
            f,
            "checks removed tag/type  {}/{}",
            self.tag_checks_removed, self.type_checks_removed
        )?;
        writeln!(
            f,
            "fields hoisted/preloaded {}/{}",
            self.fields_hoisted, self.fields_preloaded
        )?;
        writeln!(
            f,
            "array hoisted check/load {}/{}",
            self.array_checks_hoisted, self.array_loads_hoisted
        )?;
        writeln!(
            f,
            "bound checks elim/hoist  {}/{}",
            self.bound_checks_eliminated, self.bound_checks_hoisted
        )?;
        writeln!(f, "memops                   {}", self.memops)?;
        writeln!(f, "dead stores              {}", self.dead_stores)?;
        write!(f, "tail duplicated          {}", self.tail_duplicated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_lists_counters() {
        let stats = OptStats {
            cse: 3,
            memops: 1,
            ..OptStats::default()
        };
        let text = stats.to_string();
        assert!(text.contains("cse                      3"));
        assert!(text.contains("memops                   1"));
        assert_eq!(text.lines().count(), 15);
    }
}
