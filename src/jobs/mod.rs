pub mod etl_scheduler;
