pub mod rosetta;
