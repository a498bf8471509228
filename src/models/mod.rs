pub mod coin;
pub mod etl;
