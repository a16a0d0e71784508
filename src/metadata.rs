pub mod bencode;
pub mod file;
pub mod tracker;
