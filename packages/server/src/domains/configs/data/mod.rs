mod database_mapping;
mod sync_config;
mod table_mapping;
