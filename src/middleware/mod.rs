pub(crate) mod chaos;
pub(crate) mod compression;
pub(crate) mod headers_inspection;
pub(crate) mod parameters_name_decoding;
pub(crate) mod proxy_authentication;
pub(crate) mod redirect;
pub(crate) mod retry;
pub(crate) mod url_replace;
pub(crate) mod user_agent;
