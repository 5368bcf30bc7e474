pub(crate) mod approval;
pub(crate) mod exam;
pub(crate) mod report;
pub(crate) mod submission;
