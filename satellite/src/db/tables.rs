use redb::TableDefinition;

// Master database.
pub const META: TableDefinition<&str, &[u8]> = TableDefinition::new("meta");
pub const USERS: TableDefinition<&str, &[u8]> = TableDefinition::new("users");
pub const USER_EMAILS: TableDefinition<&str, &[u8]> = TableDefinition::new("user_emails");
pub const REGISTRATION_TOKENS: TableDefinition<&str, &[u8]> =
    TableDefinition::new("registration_tokens");
pub const PROJECTS: TableDefinition<&str, &[u8]> = TableDefinition::new("projects");
pub const PAYMENT_ACCOUNTS: TableDefinition<&str, &[u8]> = TableDefinition::new("payment_accounts");
pub const BANDWIDTH_ROLLUPS: TableDefinition<&str, &[u8]> =
    TableDefinition::new("bandwidth_rollups");
pub const REPAIR_QUEUE: TableDefinition<&str, &[u8]> = TableDefinition::new("repair_queue");
pub const STORAGE_TALLIES: TableDefinition<&str, &[u8]> = TableDefinition::new("storage_tallies");
pub const NODES: TableDefinition<&str, &[u8]> = TableDefinition::new("nodes");

// Pointer database.
pub const POINTERS: TableDefinition<&str, &[u8]> = TableDefinition::new("pointers");
