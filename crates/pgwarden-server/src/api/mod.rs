// ABOUTME: HTTP handler functions for the pgwarden webhook listener.
// ABOUTME: Webhooks trigger backups and dumps by launching subcommands.

pub mod webhooks;
