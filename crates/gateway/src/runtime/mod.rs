pub mod crm;
pub mod ingestion;
pub mod normalize;
pub mod preflight;
pub mod rate_limit;
pub mod retrieval;
pub mod turn;
