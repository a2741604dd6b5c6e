pub mod oracle;
pub mod workload;

pub use oracle::{compare_results, reference_gemm};
pub use workload::Workload;
