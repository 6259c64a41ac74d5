//! Repository traits for index operations.

pub mod deleted_instances;
pub mod deletion_jobs;
pub mod extended_query_tags;
pub mod instances;
pub mod partitions;

pub use deleted_instances::DeletedInstanceRepo;
pub use deletion_jobs::DeletionJobRepo;
pub use extended_query_tags::{ExtendedQueryTagRepo, NewExtendedQueryTag};
pub use instances::InstanceRepo;
pub use partitions::PartitionRepo;
