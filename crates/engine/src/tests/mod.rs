mod helpers;

mod batch_tests;
mod iterator_tests;
mod merge_tests;
