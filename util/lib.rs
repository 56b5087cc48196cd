/*!
This crate contains utilities shared by the other deep forest crates.
*/

#![allow(clippy::tabs_in_doc_comments)]

pub mod progress_counter;
