#[cfg(test)]
mod tests {
    use crate::course::*;
    use crate::error::{ChainError, ErrorClass};
    use crate::registry::ChainRegistry;
    use crate::snapshot::Author;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn setup() -> (CourseService, Arc<DirectoryCatalog>, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let catalog = Arc::new(DirectoryCatalog::open(temp_dir.path()).unwrap());
        let service = CourseService::new(catalog.clone(), Arc::new(ChainRegistry::new()));
        (service, catalog, temp_dir)
    }

    fn author() -> Author {
        Author::new("instructor", "instructor@example.com")
    }

    fn titles(docs: &[Document]) -> Vec<&str> {
        docs.iter().map(|d| d.title.as_str()).collect()
    }

    #[tokio::test]
    async fn test_create_course_commits_description() {
        let (service, catalog, temp_dir) = setup();
        let summary = service.create_course("javascript", &author()).await.unwrap();
        assert_eq!(summary.description, "<p>Description for javascript</p>");

        let location = catalog.locate("javascript").unwrap();
        assert_eq!(location, temp_dir.path().join("javascript"));
        assert!(location.join("1000Description----").exists());
        assert!(service.registry().contains(&location));

        let versions = service.versions("javascript", 10).await.unwrap();
        assert_eq!(versions.len(), 1);
        assert_eq!(versions[0].message, "initial commit");
        assert_eq!(versions[0].author_name, "instructor");

        assert_eq!(service.course("javascript").await.unwrap(), summary);
    }

    #[tokio::test]
    async fn test_create_course_twice_conflicts() {
        let (service, _catalog, _temp_dir) = setup();
        service.create_course("rust", &author()).await.unwrap();
        let err = service.create_course("rust", &author()).await.unwrap_err();
        assert!(matches!(err, ChainError::TitleConflict(_)));
        assert_eq!(err.class(), ErrorClass::Conflict);
    }

    #[tokio::test]
    async fn test_topic_lifecycle_snapshots_each_step() {
        let (service, _catalog, _temp_dir) = setup();
        let a = author();
        service.create_course("Web Dev", &a).await.unwrap();
        service
            .create_topic("Web Dev", "Intro", "hello", &a)
            .await
            .unwrap();
        service
            .create_topic("Web Dev", "Advanced", "world", &a)
            .await
            .unwrap();
        service
            .rename_topic("Web Dev", "Advanced", "Deep Dive", &a, "rename")
            .await
            .unwrap();
        service
            .update_topic("Web Dev", "Deep Dive", "WORLD", &a, "edit")
            .await
            .unwrap();
        service
            .update_description("Web Dev", "<p>new</p>", &a, "describe")
            .await
            .unwrap();
        service
            .delete_topic("Web Dev", "Intro", &a, "drop intro")
            .await
            .unwrap();

        let topics = service.topics("Web Dev").await.unwrap();
        assert_eq!(titles(&topics), vec!["Description", "Deep Dive"]);
        assert_eq!(topics[0].contents, "<p>new</p>");
        assert_eq!(
            service.topic("Web Dev", "Deep Dive").await.unwrap().contents,
            "WORLD"
        );

        let messages: Vec<_> = service
            .versions("Web Dev", 10)
            .await
            .unwrap()
            .into_iter()
            .map(|c| c.message)
            .collect();
        assert_eq!(
            messages,
            vec![
                "drop intro",
                "describe",
                "edit",
                "rename",
                "created topic Advanced",
                "created topic Intro",
                "initial commit",
            ]
        );
        assert_eq!(service.versions("Web Dev", 3).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_failed_mutation_records_nothing() {
        let (service, _catalog, _temp_dir) = setup();
        let a = author();
        service.create_course("c", &a).await.unwrap();
        let err = service
            .delete_topic("c", DESCRIPTION_TITLE, &a, "nope")
            .await
            .unwrap_err();
        assert!(matches!(err, ChainError::RootDeletionForbidden));
        let err = service.topic("c", "ghost").await.unwrap_err();
        assert_eq!(err.class(), ErrorClass::Missing);
        assert_eq!(service.versions("c", 10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_course() {
        let (service, _catalog, _temp_dir) = setup();
        assert!(matches!(
            service.topics("missing").await,
            Err(ChainError::NotFound(_))
        ));
        assert!(matches!(
            service.create_topic("missing", "t", "c", &author()).await,
            Err(ChainError::NotFound(_))
        ));
        assert!(matches!(
            service.revert("missing", "abc").await,
            Err(ChainError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_revert_rebuilds_cached_chain() {
        let (service, catalog, _temp_dir) = setup();
        let a = author();
        service.create_course("history", &a).await.unwrap();
        service.create_topic("history", "One", "1", &a).await.unwrap();
        let target = service.versions("history", 1).await.unwrap()[0].id.clone();
        service.create_topic("history", "Two", "2", &a).await.unwrap();
        service
            .delete_topic("history", "One", &a, "drop one")
            .await
            .unwrap();

        let location = catalog.locate("history").unwrap();
        let before = service.registry().get(&location).unwrap();

        service.revert("history", &target).await.unwrap();

        let after = service.registry().get(&location).unwrap();
        assert!(!Arc::ptr_eq(&before, &after));
        let topics = service.topics("history").await.unwrap();
        assert_eq!(titles(&topics), vec!["Description", "One"]);

        let ids: Vec<_> = service
            .versions("history", 10)
            .await
            .unwrap()
            .into_iter()
            .map(|c| c.id)
            .collect();
        assert_eq!(ids.len(), 2);
        assert_eq!(ids[0], target);

        // the chain keeps working after the reset
        service.create_topic("history", "Three", "3", &a).await.unwrap();
        let topics = service.topics("history").await.unwrap();
        assert_eq!(titles(&topics), vec!["Description", "One", "Three"]);
    }

    #[tokio::test]
    async fn test_revert_unknown_commit_invalidates_cache() {
        let (service, catalog, _temp_dir) = setup();
        service.create_course("c", &author()).await.unwrap();
        let location = catalog.locate("c").unwrap();
        assert!(service.registry().contains(&location));

        let err = service.revert("c", "deadbeef").await.unwrap_err();
        assert!(matches!(err, ChainError::NotFound(_)));
        assert!(!service.registry().contains(&location));
        assert_eq!(service.topics("c").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_list_courses_query_and_paging() {
        let (service, _catalog, _temp_dir) = setup();
        for title in ["Rust Basics", "Advanced Rust", "Go", "Python"] {
            service.create_course(title, &author()).await.unwrap();
        }

        let all = service.list_courses(None, None, None).await.unwrap();
        assert_eq!(all.total, 4);
        assert_eq!(all.courses.len(), 4);

        let rust = service.list_courses(Some("rust"), None, None).await.unwrap();
        let names: Vec<_> = rust.courses.iter().map(|c| c.title.as_str()).collect();
        assert_eq!(names, vec!["Advanced Rust", "Rust Basics"]);

        let page = service.list_courses(None, Some(2), Some(3)).await.unwrap();
        assert_eq!(page.total, 4);
        assert_eq!(page.courses.len(), 1);
        assert_eq!(page.courses[0].title, "Rust Basics");
    }

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_mutation_queued_behind_revert_uses_reverted_chain() {
        let (service, catalog, _temp_dir) = setup();
        let service = Arc::new(service);
        let a = author();
        service.create_course("c", &a).await.unwrap();
        service.create_topic("c", "One", "1", &a).await.unwrap();
        let target = service.versions("c", 1).await.unwrap()[0].id.clone();
        service.create_topic("c", "Two", "2", &a).await.unwrap();

        let location = catalog.locate("c").unwrap();
        let held = service.registry().get(&location).unwrap();
        let guard = held.lock().await;

        let reverting = tokio::spawn({
            let service = service.clone();
            async move { service.revert("c", &target).await }
        });
        settle().await;
        let appending = tokio::spawn({
            let service = service.clone();
            let a = a.clone();
            async move { service.create_topic("c", "Three", "3", &a).await }
        });
        settle().await;
        drop(guard);

        reverting.await.unwrap().unwrap();
        appending.await.unwrap().unwrap();

        let topics = service.topics("c").await.unwrap();
        assert_eq!(titles(&topics), vec!["Description", "One", "Three"]);
        let current = service.registry().get(&location).unwrap();
        assert!(!Arc::ptr_eq(&held, &current));
        {
            let chain = current.lock().await;
            assert!(chain.orphans().is_empty());
            chain.verify().unwrap();
        }
        assert!(location.join("1002Three----").exists());
        assert!(!location.join("1002Two----").exists());

        let messages: Vec<_> = service
            .versions("c", 10)
            .await
            .unwrap()
            .into_iter()
            .map(|c| c.message)
            .collect();
        assert_eq!(
            messages,
            vec!["created topic Three", "created topic One", "initial commit"]
        );
    }

    #[tokio::test]
    async fn test_mutation_queued_behind_delete_sees_missing_course() {
        let (service, catalog, _temp_dir) = setup();
        let service = Arc::new(service);
        let a = author();
        service.create_course("c", &a).await.unwrap();
        let location = catalog.locate("c").unwrap();
        let held = service.registry().get(&location).unwrap();
        let guard = held.lock().await;

        let deleting = tokio::spawn({
            let service = service.clone();
            async move { service.delete_course("c").await }
        });
        settle().await;
        let appending = tokio::spawn({
            let service = service.clone();
            let a = a.clone();
            async move { service.create_topic("c", "Late", "x", &a).await }
        });
        settle().await;
        drop(guard);

        deleting.await.unwrap().unwrap();
        let err = appending.await.unwrap().unwrap_err();
        assert!(matches!(err, ChainError::NotFound(_)));
        assert!(!location.exists());
        assert!(service.registry().is_empty());
    }

    #[tokio::test]
    async fn test_half_failed_mutation_drops_cached_chain() {
        let (service, catalog, _temp_dir) = setup();
        let a = author();
        service.create_course("c", &a).await.unwrap();
        service.create_topic("c", "One", "1", &a).await.unwrap();
        let location = catalog.locate("c").unwrap();

        // the tail disappears behind the cache, so the append cannot relink it
        std::fs::remove_file(location.join("1001One----")).unwrap();
        let err = service.create_topic("c", "Two", "2", &a).await.unwrap_err();
        assert!(matches!(err, ChainError::InconsistentChain(_)));
        assert!(!service.registry().contains(&location));
        assert!(location.join("1002Two----").exists());

        let rebuilt = service.registry().get(&location).unwrap();
        assert_eq!(rebuilt.lock().await.orphans(), &["1002Two----".to_string()]);
        assert_eq!(service.versions("c", 10).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_rejected_mutation_keeps_cached_chain() {
        let (service, catalog, _temp_dir) = setup();
        let a = author();
        service.create_course("c", &a).await.unwrap();
        service.create_topic("c", "One", "1", &a).await.unwrap();
        let location = catalog.locate("c").unwrap();
        let cached = service.registry().get(&location).unwrap();

        let err = service.create_topic("c", "One", "again", &a).await.unwrap_err();
        assert!(matches!(err, ChainError::TitleConflict(_)));
        assert!(service.registry().is_current(&location, &cached));
    }

    #[tokio::test]
    async fn test_list_courses_zero_page_returns_everything() {
        let (service, _catalog, _temp_dir) = setup();
        for title in ["a", "b", "c"] {
            service.create_course(title, &author()).await.unwrap();
        }
        for (page, size) in [(Some(0), Some(2)), (Some(1), Some(0))] {
            let listed = service.list_courses(None, page, size).await.unwrap();
            assert_eq!(listed.total, 3);
            assert_eq!(listed.courses.len(), 3);
        }
    }

    #[tokio::test]
    async fn test_list_courses_skips_broken_course() {
        let (service, catalog, _temp_dir) = setup();
        service.create_course("good", &author()).await.unwrap();
        service.create_course("bad", &author()).await.unwrap();
        let bad = catalog.locate("bad").unwrap();
        service.registry().invalidate(&bad);
        std::fs::remove_file(bad.join("1000Description----")).unwrap();

        let page = service.list_courses(None, None, None).await.unwrap();
        assert_eq!(page.total, 1);
        assert_eq!(page.courses.len(), 1);
        assert_eq!(page.courses[0].title, "good");
    }

    #[tokio::test]
    async fn test_rename_and_delete_course() {
        let (service, catalog, _temp_dir) = setup();
        let a = author();
        service.create_course("old name", &a).await.unwrap();
        service.create_topic("old name", "T", "t", &a).await.unwrap();

        service.rename_course("old name", "new name").await.unwrap();
        assert!(matches!(
            service.course("old name").await,
            Err(ChainError::NotFound(_))
        ));
        assert_eq!(service.topics("new name").await.unwrap().len(), 2);

        let location = catalog.locate("new name").unwrap();
        service.delete_course("new name").await.unwrap();
        assert!(!location.exists());
        assert!(catalog.locate("new name").is_none());
        assert!(service.registry().is_empty());
    }

    #[tokio::test]
    async fn test_state_survives_fresh_service() {
        let (service, _catalog, temp_dir) = setup();
        let a = author();
        service.create_course("persist", &a).await.unwrap();
        service.create_topic("persist", "A", "a", &a).await.unwrap();
        service.create_topic("persist", "B", "b", &a).await.unwrap();
        let expected = service.topics("persist").await.unwrap();
        drop(service);

        let catalog = Arc::new(DirectoryCatalog::open(temp_dir.path()).unwrap());
        let fresh = CourseService::new(catalog, Arc::new(ChainRegistry::new()));
        assert_eq!(fresh.topics("persist").await.unwrap(), expected);
    }
}
