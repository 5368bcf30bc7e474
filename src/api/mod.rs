pub(crate) mod approvals;
pub(crate) mod errors;
pub(crate) mod exams;
pub(crate) mod handlers;
pub(crate) mod router;
pub(crate) mod submissions;
