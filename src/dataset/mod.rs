pub mod organize;

pub use organize::{organize_dataset, detect_layout, count_images, OrganizeOptions, OrganizeSummary, SourceLayout};
