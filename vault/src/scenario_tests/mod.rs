//! Scenario tests against real collection directories.
//!
//! Each file drives one scenario through `CollectionMeta`, `FragmentStore`
//! or `IndexHandle` on a temporary `DirBackend`, and checks both the
//! answers and the files left on disk.

#![cfg(test)]

mod helpers;

mod test_determinism;
mod test_eviction;
mod test_handle;
mod test_lazy_open;
mod test_number_keys;
mod test_reopen;
mod test_split_merge_files;
mod test_wrong_key;
