/// Initialization configuration for the SLIC component.
#[derive(Debug, Clone, Copy)]
pub struct SlicConfig {
    /// How far the source identity is propagated into the discovery
    /// structures once the SLIC is registered.
    pub breadth: PatchBreadth,
    /// Whether to copy the SLP 1.0 string into a legacy BIOS region.
    pub inject_slp: bool,
}

/// Propagation breadth for the patch phase.
///
/// Some firmware refreshes the identity fields of the discovery structures
/// on its own after a table is registered; `Untouched` is for those
/// platforms. `AllTables` rewrites member tables in place and cannot be
/// undone, so it is never a default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PatchBreadth {
    /// Leave the discovery structures alone.
    #[default]
    Untouched,
    /// Rewrite the root descriptor and the chain-table headers.
    RootTables,
    /// Additionally rewrite every member table that belonged to the chain's
    /// OEM group before the chain itself was rewritten.
    AllTables,
}

impl Default for SlicConfig {
    fn default() -> Self {
        Self { breadth: PatchBreadth::Untouched, inject_slp: true }
    }
}
