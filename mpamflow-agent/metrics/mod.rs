pub mod mpam;
