pub mod contact;
pub mod event;
pub mod request;
pub mod site;
pub mod threat;
