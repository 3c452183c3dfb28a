pub mod apr_resolver;
pub mod apr_scraper;
pub mod browser;
pub mod cosmos_rest;
pub mod scrape_coordinator;
