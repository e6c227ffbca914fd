mod client;

pub use client::{
    ApiClient, ApiError, ApiErrorClass, CapabilitySet, ChildEntry, ChildrenPage, EncryptionCaps,
    EncryptionJob, EncryptionPlan, FolderStats, JobMode, JobState, MoveOutcome, MoveRequest,
    RenameOutcome, StartOutcome,
};
