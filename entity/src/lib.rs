//! sea-orm models for every table the deal desk reads or writes.

pub mod business_listing;
pub mod deal;
pub mod deal_communication;
pub mod deal_document;
pub mod deal_stage_history;
pub mod deal_task;
pub mod favorite;
pub mod stage_meta;
