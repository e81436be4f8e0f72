use futures::StreamExt;
use std::sync::Arc;

use crate::application::error::LedgerResult;
use crate::application::ledger::types::User;
use crate::infrastructure::database::LedgerStore;

pub const EXPORT_FILE_NAME: &str = "users_export.csv";

const HEADER: [&str; 9] = [
    "id",
    "username",
    "registered_at",
    "balance",
    "referrals",
    "completed_tasks",
    "task_ids",
    "completed_at",
    "status",
];

/// Write-only CSV dump of every user, for operators.
pub struct UserExport {
    pub csv: String,
    pub rows: usize,
}

pub async fn export_users(store: &Arc<dyn LedgerStore>) -> LedgerResult<UserExport> {
    let mut csv = HEADER.join(",");
    csv.push('\n');
    let mut rows = 0;

    let mut users = store.list_users().await?;
    while let Some(user) = users.next().await {
        let user = user?;
        csv.push_str(&user_row(&user));
        csv.push('\n');
        rows += 1;
    }
    log::info!("exported {} users", rows);
    Ok(UserExport { csv, rows })
}

fn user_row(user: &User) -> String {
    let task_ids = user
        .completed_tasks
        .keys()
        .map(|id| id.to_string())
        .collect::<Vec<_>>()
        .join(" ");
    let completed_at = user
        .completed_tasks
        .values()
        .map(|at| at.format("%Y-%m-%d %H:%M").to_string())
        .collect::<Vec<_>>()
        .join("; ");
    let fields = [
        user.id.to_string(),
        user.username
            .as_deref()
            .map(|name| format!("@{}", name))
            .unwrap_or_default(),
        user.registered_at.format("%Y-%m-%d %H:%M").to_string(),
        user.balance.to_string(),
        user.referrals.len().to_string(),
        user.completed_tasks.len().to_string(),
        task_ids,
        completed_at,
        if user.blocked { "blocked" } else { "active" }.to_string(),
    ];

    let mut row = String::new();
    for (i, field) in fields.iter().enumerate() {
        if i > 0 {
            row.push(',');
        }
        row.push_str(&escape_field(field));
    }
    row
}

fn escape_field(field: &str) -> String {
    if field.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::database::MemoryStore;
    use chrono::Utc;

    #[test]
    fn fields_with_separators_are_quoted() {
        assert_eq!(escape_field("plain"), "plain");
        assert_eq!(escape_field("a,b"), "\"a,b\"");
        assert_eq!(escape_field("say \"hi\""), "\"say \"\"hi\"\"\"");
    }

    #[tokio::test]
    async fn export_lists_every_user_with_counts() {
        let store: Arc<dyn LedgerStore> = Arc::new(MemoryStore::new());
        let now = Utc::now();
        let mut alice = User::new(1, Some("alice".to_string()), now);
        alice.completed_tasks.insert(3, now);
        alice.completed_tasks.insert(7, now);
        store.insert_user_if_absent(&alice).await.unwrap();
        store.insert_user_if_absent(&User::new(2, None, now)).await.unwrap();
        store.add_referral(1, 2).await.unwrap();
        store.adjust_balance(1, 40).await.unwrap();
        store.set_blocked(2, true).await.unwrap();

        let export = export_users(&store).await.unwrap();
        assert_eq!(export.rows, 2);
        let lines: Vec<&str> = export.csv.lines().collect();
        assert_eq!(lines[0], HEADER.join(","));
        let alice_row = lines.iter().find(|l| l.starts_with("1,")).unwrap();
        assert!(alice_row.contains(",@alice,"));
        assert!(alice_row.contains(",40,1,2,3 7,"));
        assert!(alice_row.ends_with(",active"));
        let bob_row = lines.iter().find(|l| l.starts_with("2,")).unwrap();
        assert!(bob_row.ends_with(",blocked"));
    }
}
