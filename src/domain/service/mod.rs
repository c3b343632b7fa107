mod message_domain_service;
mod thread_domain_service;

pub use message_domain_service::MessageDomainService;
pub use thread_domain_service::ThreadDomainService;
