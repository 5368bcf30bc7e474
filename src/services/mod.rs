pub(crate) mod approval;
pub(crate) mod storage;
