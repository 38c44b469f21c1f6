pub(crate) mod disk;
pub(crate) mod local;
pub(crate) mod remote;
