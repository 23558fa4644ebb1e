mod contracts;
mod ingest;

pub use contracts::{
    ContractToolsService, DiffReport, SimulationReport, ValidationReport,
};
pub use ingest::{ContractRef, IngestOutcome, IngestService};
