//! Types for the cached query service.

/// Statistics about service usage.
#[derive(Debug, Clone, Default)]
pub struct ServiceStats {
    /// Number of queries executed.
    pub queries_executed: usize,
    /// Number of queries whose filter was rewritten by the optimizer.
    pub optimized_queries: usize,
    /// Subtrees replaced by cached payloads.
    pub flattened_subtrees: usize,
    /// Subtrees deferred to a shared cache computation.
    pub deferred_subtrees: usize,
    /// Total time spent executing in milliseconds.
    pub total_execution_time_ms: f64,
}

impl ServiceStats {
    /// Returns the average execution time in milliseconds.
    pub fn avg_execution_time_ms(&self) -> f64 {
        if self.queries_executed == 0 {
            0.0
        } else {
            self.total_execution_time_ms / self.queries_executed as f64
        }
    }
}

impl std::fmt::Display for ServiceStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Cached Query Service Statistics:")?;
        writeln!(f, "  Queries:         {}", self.queries_executed)?;
        writeln!(f, "  Optimized:       {}", self.optimized_queries)?;
        writeln!(f, "  Flattened:       {}", self.flattened_subtrees)?;
        writeln!(f, "  Deferred:        {}", self.deferred_subtrees)?;
        writeln!(f, "  Total time:      {:.1}ms", self.total_execution_time_ms)?;
        writeln!(f, "  Avg time:        {:.3}ms", self.avg_execution_time_ms())?;
        Ok(())
    }
}
