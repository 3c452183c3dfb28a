pub mod apr_cache_repository;
