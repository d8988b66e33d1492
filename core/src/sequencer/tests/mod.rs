
mod cancellation;
mod failures;
mod recovery;
