//! Repository traits for catalog operations.

pub mod cascade;
pub mod datasets;
pub mod entities;
pub mod filters;
pub mod grants;
pub mod images;
pub mod metadata;
pub mod projects;
pub mod users;

pub use cascade::CascadeRepo;
pub use datasets::DatasetRepo;
pub use entities::EntityRepo;
pub use filters::FilterRepo;
pub use grants::GrantRepo;
pub use images::ImageRepo;
pub use metadata::MetadataRepo;
pub use projects::ProjectRepo;
pub use users::UserRepo;
