//! TursoStore Integration Tests
//!
//! `TreeService` over the libsql file store: committed state survives a
//! reopen, rejected mutations leave nothing behind and the stored rows pass
//! the integrity check. Store-level tests cover the per-tree writer locks.

#![cfg(feature = "turso")]

#[cfg(test)]
mod turso_store_tests {
    use std::path::PathBuf;
    use std::sync::Arc;
    use std::time::Duration;

    use anyhow::Result;
    use codetree_core::db::{DatabaseService, TreeStore, TursoStore};
    use codetree_core::models::{NewTree, Node, NodeView, PersonProfile, Position, Tree};
    use codetree_core::operations::CreateNodeParams;
    use codetree_core::services::{AllowAll, ErrorKind, Principal, TreeService};
    use tempfile::TempDir;

    fn owner() -> Principal {
        Principal::new("owner")
    }

    /// Helper to create a service over a fresh database file
    async fn create_test_service() -> Result<(TreeService, PathBuf, TempDir)> {
        let temp_dir = TempDir::new()?;
        let db_path = temp_dir.path().join("trees.db");
        let service = open_service(&db_path).await?;
        Ok((service, db_path, temp_dir))
    }

    async fn open_service(db_path: &PathBuf) -> Result<TreeService> {
        let db = Arc::new(DatabaseService::new(db_path.clone()).await?);
        Ok(TreeService::new(Arc::new(TursoStore::new(db)), Arc::new(AllowAll)))
    }

    async fn new_tree(service: &TreeService) -> Result<Tree> {
        Ok(service
            .create_tree(
                &owner(),
                NewTree {
                    name: "Class of 2024".to_string(),
                    description: "Graduating class".to_string(),
                },
            )
            .await?)
    }

    async fn person(
        service: &TreeService,
        tree_id: &str,
        nickname: &str,
        parents: &[&str],
    ) -> Result<NodeView> {
        let mut params = CreateNodeParams::new(PersonProfile::with_nickname(nickname));
        for parent in parents {
            params = params.with_parent(*parent);
        }
        Ok(service.create_node(&owner(), tree_id, params).await?)
    }

    /// Helper to create a bare store holding two empty trees
    async fn store_with_two_trees(
        busy_timeout_ms: u64,
    ) -> Result<(Arc<TursoStore>, Tree, Tree, TempDir)> {
        let temp_dir = TempDir::new()?;
        let db_path = temp_dir.path().join("locks.db");
        let db = DatabaseService::with_busy_timeout(db_path, busy_timeout_ms).await?;
        let store = Arc::new(TursoStore::new(Arc::new(db)));
        let a = store
            .create_tree(Tree::new("a".into(), String::new(), "owner".into()))
            .await?;
        let b = store
            .create_tree(Tree::new("b".into(), String::new(), "owner".into()))
            .await?;
        Ok((store, a, b, temp_dir))
    }

    async fn count_rows(db_path: PathBuf, table: &str, column: &str, tree_id: &str) -> Result<i64> {
        let db = DatabaseService::new(db_path).await?;
        let conn = db.connect_with_timeout().await?;
        let sql = format!("SELECT COUNT(*) FROM {} WHERE {} = ?", table, column);
        let mut rows = conn.query(&sql, [tree_id]).await?;
        let row = rows.next().await?.ok_or_else(|| anyhow::anyhow!("no count row"))?;
        Ok(row.get::<i64>(0)?)
    }

    #[tokio::test]
    async fn test_state_survives_reopen() -> Result<()> {
        let (service, db_path, _temp_dir) = create_test_service().await?;
        let tree = new_tree(&service).await?;
        let a = person(&service, &tree.id, "A", &[]).await?;
        let b = person(&service, &tree.id, "B", &[]).await?;
        let kid = person(&service, &tree.id, "Kid", &[a.node.id.as_str(), b.node.id.as_str()]).await?;
        assert_eq!(kid.parent_ids, vec![a.node.id.clone(), b.node.id.clone()]);

        let params = CreateNodeParams {
            position: Position { x: 12.5, y: -3.0 },
            properties: Some(serde_json::json!({"phone": "555-0100"})),
            ..CreateNodeParams::new(PersonProfile::with_nickname("Placed"))
        }
        .with_parent(&kid.node.id);
        let placed = service.create_node(&owner(), &tree.id, params).await?;
        drop(service);

        let reopened = open_service(&db_path).await?;
        assert_eq!(reopened.get_tree(&tree.id).await?.description, "Graduating class");

        let kid_after = reopened.get_node(&tree.id, &kid.node.id).await?;
        assert_eq!(kid_after.parent_ids, kid.parent_ids);
        assert_eq!(kid_after.node.generation, 2);

        let placed_after = reopened.get_node(&tree.id, &placed.node.id).await?;
        assert_eq!(placed_after.node.generation, 3);
        assert_eq!(placed_after.node.position, Position { x: 12.5, y: -3.0 });
        assert_eq!(placed_after.node.properties["phone"], "555-0100");

        let report = reopened.check_integrity(&tree.id).await?;
        assert!(report.is_clean(), "violations: {:?}", report.violations);
        assert_eq!(report.node_count, 4);
        Ok(())
    }

    #[tokio::test]
    async fn test_primary_removal_persists_regenerated_generations() -> Result<()> {
        let (service, _db_path, _temp_dir) = create_test_service().await?;
        let tree = new_tree(&service).await?;
        let me = owner();

        let a = person(&service, &tree.id, "A", &[]).await?;
        let deep1 = person(&service, &tree.id, "D1", &[]).await?;
        let deep2 = person(&service, &tree.id, "D2", &[deep1.node.id.as_str()]).await?;
        let x = person(&service, &tree.id, "X", &[a.node.id.as_str()]).await?;
        let y = person(&service, &tree.id, "Y", &[x.node.id.as_str()]).await?;

        service.add_parent(&me, &tree.id, &x.node.id, &deep2.node.id).await?;
        let outcome = service.remove_parent(&me, &tree.id, &x.node.id, &a.node.id).await?;
        assert_eq!(outcome.node.node.generation, 3);
        assert_eq!(outcome.regenerated.len(), 2);

        assert_eq!(service.get_node(&tree.id, &y.node.id).await?.node.generation, 4);
        let report = service.check_integrity(&tree.id).await?;
        assert!(report.is_clean(), "violations: {:?}", report.violations);
        Ok(())
    }

    #[tokio::test]
    async fn test_rejected_mutation_writes_nothing() -> Result<()> {
        let (service, _db_path, _temp_dir) = create_test_service().await?;
        let tree = new_tree(&service).await?;
        let a = person(&service, &tree.id, "A", &[]).await?;
        let b = person(&service, &tree.id, "B", &[a.node.id.as_str()]).await?;

        let err = service
            .move_node(&owner(), &tree.id, &a.node.id, &b.node.id, None)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CircularReference);
        assert!(service.get_node(&tree.id, &a.node.id).await?.parent_ids.is_empty());

        // the transaction was closed, so the next writer is not blocked
        let c = person(&service, &tree.id, "C", &[b.node.id.as_str()]).await?;
        assert_eq!(c.node.generation, 3);
        Ok(())
    }

    #[tokio::test]
    async fn test_cascading_delete_removes_rows() -> Result<()> {
        let (service, db_path, _temp_dir) = create_test_service().await?;
        let tree = new_tree(&service).await?;
        let a = person(&service, &tree.id, "A", &[]).await?;
        let b = person(&service, &tree.id, "B", &[a.node.id.as_str()]).await?;
        let other = person(&service, &tree.id, "Other", &[]).await?;
        person(&service, &tree.id, "Shared", &[b.node.id.as_str(), other.node.id.as_str()]).await?;

        let deleted = service.delete_node(&owner(), &tree.id, &a.node.id).await?;
        assert_eq!(deleted.len(), 3);

        assert_eq!(count_rows(db_path, "node_parents", "tree_id", &tree.id).await?, 0);

        let remaining = service.list_nodes(&tree.id).await?;
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].node.id, other.node.id);
        Ok(())
    }

    #[tokio::test]
    async fn test_cross_tree_lookup_uses_the_database() -> Result<()> {
        let (service, _db_path, _temp_dir) = create_test_service().await?;
        let left = new_tree(&service).await?;
        let right = new_tree(&service).await?;
        let l = person(&service, &left.id, "L", &[]).await?;
        let r = person(&service, &right.id, "R", &[]).await?;

        let err = service
            .add_parent(&owner(), &right.id, &r.node.id, &l.node.id)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CrossTreeViolation);
        Ok(())
    }

    #[tokio::test]
    async fn test_store_snapshot_of_missing_tree() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let db = Arc::new(DatabaseService::new(temp_dir.path().join("t.db")).await?);
        let store = TursoStore::new(db);
        assert!(store.snapshot("missing").await?.is_none());
        assert!(store.get_tree("missing").await?.is_none());
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_writers_on_one_file_are_serialized() -> Result<()> {
        let (service, _db_path, _temp_dir) = create_test_service().await?;
        let tree = new_tree(&service).await?;
        let root = person(&service, &tree.id, "Root", &[]).await?;

        let mut handles = Vec::new();
        for i in 0..4 {
            let service = service.clone();
            let tree_id = tree.id.clone();
            let root_id = root.node.id.clone();
            handles.push(tokio::spawn(async move {
                let params = CreateNodeParams::new(PersonProfile::with_nickname(format!("kid-{}", i)))
                    .with_parent(root_id);
                service.create_node(&owner(), &tree_id, params).await
            }));
        }
        for handle in handles {
            handle.await??;
        }

        assert_eq!(service.get_descendants(&tree.id, &root.node.id).await?.len(), 4);
        let report = service.check_integrity(&tree.id).await?;
        assert!(report.is_clean(), "violations: {:?}", report.violations);
        Ok(())
    }

    #[tokio::test]
    async fn test_delete_tree_removes_every_row() -> Result<()> {
        let (service, db_path, _temp_dir) = create_test_service().await?;
        let doomed = new_tree(&service).await?;
        let kept = new_tree(&service).await?;
        let a = person(&service, &doomed.id, "A", &[]).await?;
        let b = person(&service, &doomed.id, "B", &[]).await?;
        person(&service, &doomed.id, "Kid", &[a.node.id.as_str(), b.node.id.as_str()]).await?;
        person(&service, &kept.id, "Stays", &[]).await?;

        let err = service
            .delete_tree(&Principal::new("stranger"), &doomed.id)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PermissionDenied);

        service.delete_tree(&owner(), &doomed.id).await?;
        assert_eq!(service.get_tree(&doomed.id).await.unwrap_err().kind(), ErrorKind::NotFound);
        assert_eq!(count_rows(db_path.clone(), "trees", "id", &doomed.id).await?, 0);
        assert_eq!(count_rows(db_path.clone(), "nodes", "tree_id", &doomed.id).await?, 0);
        assert_eq!(count_rows(db_path.clone(), "node_parents", "tree_id", &doomed.id).await?, 0);

        assert_eq!(service.list_nodes(&kept.id).await?.len(), 1);
        assert_eq!(count_rows(db_path, "nodes", "tree_id", &kept.id).await?, 1);
        let err = service.delete_tree(&owner(), &doomed.id).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        Ok(())
    }

    #[tokio::test]
    async fn test_open_transaction_does_not_block_other_trees() -> Result<()> {
        let (store, a, b, _temp_dir) = store_with_two_trees(300).await?;
        let held = store.begin(&a.id).await?;

        let mut txn = tokio::time::timeout(Duration::from_secs(2), store.begin(&b.id)).await??;
        txn.save_node(&Node::new(b.id.clone(), PersonProfile::with_nickname("B")))
            .await?;
        txn.commit().await?;

        held.rollback().await?;
        let snapshot = store.snapshot(&b.id).await?.ok_or_else(|| anyhow::anyhow!("tree b"))?;
        assert_eq!(snapshot.nodes.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_same_tree_transactions_wait_for_each_other() -> Result<()> {
        let (store, a, _b, _temp_dir) = store_with_two_trees(300).await?;
        let first = store.begin(&a.id).await?;

        let other = Arc::clone(&store);
        let tree_id = a.id.clone();
        let waiter = tokio::spawn(async move { other.begin(&tree_id).await.map(drop) });
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!waiter.is_finished());

        first.commit().await?;
        waiter.await??;
        Ok(())
    }

    #[tokio::test]
    async fn test_persist_step_of_two_trees_takes_turns() -> Result<()> {
        let (store, a, b, _temp_dir) = store_with_two_trees(5000).await?;
        let mut first = store.begin(&a.id).await?;
        first
            .save_node(&Node::new(a.id.clone(), PersonProfile::with_nickname("A")))
            .await?;

        let other = Arc::clone(&store);
        let tree_id = b.id.clone();
        let second = tokio::spawn(async move {
            let mut txn = other.begin(&tree_id).await?;
            txn.save_node(&Node::new(tree_id.clone(), PersonProfile::with_nickname("B")))
                .await?;
            txn.commit().await
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        first.commit().await?;
        second.await??;

        for tree in [&a, &b] {
            let snapshot = store.snapshot(&tree.id).await?.ok_or_else(|| anyhow::anyhow!("tree"))?;
            assert_eq!(snapshot.nodes.len(), 1);
        }
        Ok(())
    }

    #[tokio::test]
    async fn test_dropped_transaction_rolls_back() -> Result<()> {
        let (store, a, _b, _temp_dir) = store_with_two_trees(300).await?;
        {
            let mut txn = store.begin(&a.id).await?;
            txn.save_node(&Node::new(a.id.clone(), PersonProfile::with_nickname("Lost")))
                .await?;
        }
        let snapshot = store.snapshot(&a.id).await?.ok_or_else(|| anyhow::anyhow!("tree a"))?;
        assert!(snapshot.nodes.is_empty());

        // both the tree lock and the file write lock were released
        let mut txn = tokio::time::timeout(Duration::from_secs(2), store.begin(&a.id)).await??;
        txn.save_node(&Node::new(a.id.clone(), PersonProfile::with_nickname("Kept")))
            .await?;
        txn.commit().await?;
        let snapshot = store.snapshot(&a.id).await?.ok_or_else(|| anyhow::anyhow!("tree a"))?;
        assert_eq!(snapshot.nodes.len(), 1);
        Ok(())
    }
}
