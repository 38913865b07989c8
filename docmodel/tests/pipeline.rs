mod common;

use std::sync::{Arc, Mutex};

use docmodel::prelude::*;
use futures::FutureExt;
use tokio::sync::oneshot;

use common::{Log, connect};

fn logging_pre(log: &Log, entry: &'static str) -> impl Fn(&mut Document, Next) -> futures::future::BoxFuture<'static, ()> + Send + Sync + 'static {
    let log = log.clone();
    move |_doc: &mut Document, next: Next| {
        let log = log.clone();
        async move {
            tokio::task::yield_now().await;
            log.push(entry);
            next.proceed();
        }
        .boxed()
    }
}

async fn stored_count(store: &InMemoryStore, collection: &str) -> usize {
    store
        .find(collection, doc! {}, None, FindOptions::default())
        .await
        .unwrap()
        .len()
}

#[tokio::test]
async fn serial_pres_run_in_declaration_order_around_the_handler() {
    let log = Log::default();
    let handler_log = log.clone();

    let mut registry = Registry::new();
    registry
        .register(
            SchemaDefinition::new("Dog")
                .string("name")
                .pre("save", logging_pre(&log, "pre a"))
                .pre("save", logging_pre(&log, "pre b"))
                .hook("save", move |inner, doc, args| {
                    let log = handler_log.clone();
                    async move {
                        log.push("handler");
                        inner(doc, args).await
                    }
                    .boxed()
                })
                .post("save", logging_pre(&log, "post a"))
                .post("save", logging_pre(&log, "post b")),
        )
        .unwrap();
    let (connection, store) = connect(&registry).await;

    let mut dog = connection
        .model("Dog")
        .unwrap()
        .create(doc! { "name": "Rex" })
        .await
        .unwrap();
    dog.save().await.unwrap();

    assert_eq!(log.entries(), ["pre a", "pre b", "handler", "post a", "post b"]);
    assert_eq!(stored_count(&store, "dog").await, 1);
}

#[tokio::test]
async fn serial_pres_can_mutate_the_document_before_the_handler() {
    let mut registry = Registry::new();
    registry
        .register(SchemaDefinition::new("Dog").string("name").pre("save", |doc, next| {
            doc.set("name", "Renamed").unwrap();
            async move { next.proceed() }.boxed()
        }))
        .unwrap();
    let (connection, store) = connect(&registry).await;

    let mut dog = connection
        .model("Dog")
        .unwrap()
        .create(doc! { "name": "Rex" })
        .await
        .unwrap();
    dog.save().await.unwrap();

    let stored = store
        .find("dog", doc! {}, None, FindOptions::default())
        .await
        .unwrap();
    assert_eq!(stored[0].get_str("name").unwrap(), "Renamed");
}

type Release = Arc<Mutex<Option<oneshot::Receiver<()>>>>;

fn released_parallel(
    log: &Log,
    name: &'static str,
    release: Release,
) -> impl Fn(&mut Document, Next, Done) -> futures::future::BoxFuture<'static, ()> + Send + Sync + 'static
{
    let log = log.clone();
    move |_doc: &mut Document, next: Next, done: Done| {
        log.push(format!("start {name}"));
        let log = log.clone();
        let release = release.lock().unwrap().take();
        async move {
            next.proceed();
            if let Some(release) = release {
                let _ = release.await;
            }
            log.push(format!("done {name}"));
            done.complete();
        }
        .boxed()
    }
}

#[tokio::test]
async fn parallel_pres_start_together_and_finish_independently() {
    let log = Log::default();
    let (release_a, wait_a) = oneshot::channel();
    let (release_b, wait_b) = oneshot::channel();
    let handler_log = log.clone();
    let post_log = log.clone();

    let mut registry = Registry::new();
    registry
        .register(
            SchemaDefinition::new("Dog")
                .string("name")
                .pre_parallel("save", released_parallel(&log, "a", Arc::new(Mutex::new(Some(wait_a)))))
                .pre_parallel("save", released_parallel(&log, "b", Arc::new(Mutex::new(Some(wait_b)))))
                .hook("save", move |inner, doc, args| {
                    let log = handler_log.clone();
                    async move {
                        log.push("handler");
                        inner(doc, args).await
                    }
                    .boxed()
                })
                .post("save", move |_doc, next| {
                    post_log.push("post");
                    async move { next.proceed() }.boxed()
                }),
        )
        .unwrap();
    let (connection, _store) = connect(&registry).await;

    let mut dog = connection
        .model("Dog")
        .unwrap()
        .create(doc! { "name": "Rex" })
        .await
        .unwrap();
    dog.save().await.unwrap();

    assert_eq!(log.entries(), ["start a", "start b", "handler", "post"]);

    release_b.send(()).unwrap();
    log.wait_for("done b").await;
    release_a.send(()).unwrap();
    dog.settle().await;

    assert_eq!(
        log.entries(),
        ["start a", "start b", "handler", "post", "done b", "done a"]
    );
}

#[tokio::test]
async fn late_parallel_failures_do_not_fail_the_save() {
    let mut registry = Registry::new();
    registry
        .register(SchemaDefinition::new("Dog").string("name").pre_parallel(
            "save",
            |_doc, next, done| {
                async move {
                    next.proceed();
                    done.fail(ModelError::Hook("audit log unavailable".into()));
                }
                .boxed()
            },
        ))
        .unwrap();
    let (connection, store) = connect(&registry).await;

    let mut dog = connection
        .model("Dog")
        .unwrap()
        .create(doc! { "name": "Rex" })
        .await
        .unwrap();
    dog.save().await.unwrap();
    dog.settle().await;

    assert!(!dog.is_new());
    assert_eq!(stored_count(&store, "dog").await, 1);
}

#[tokio::test]
async fn a_failing_pre_aborts_the_rest_of_the_pipeline() {
    let log = Log::default();

    let mut registry = Registry::new();
    registry
        .register(
            SchemaDefinition::new("Dog")
                .string("name")
                .pre("save", |_doc, next| {
                    async move { next.abort(ModelError::Hook("not today".into())) }.boxed()
                })
                .pre("save", logging_pre(&log, "second pre"))
                .post("save", logging_pre(&log, "post")),
        )
        .unwrap();
    let (connection, store) = connect(&registry).await;

    let mut dog = connection
        .model("Dog")
        .unwrap()
        .create(doc! { "name": "Rex" })
        .await
        .unwrap();
    let err = dog.save().await.unwrap_err();

    assert!(matches!(err, ModelError::Hook(message) if message == "not today"));
    assert!(log.entries().is_empty());
    assert!(dog.is_new());
    assert_eq!(stored_count(&store, "dog").await, 0);
}

#[tokio::test]
async fn a_pre_that_never_calls_next_fails_the_pipeline() {
    let mut registry = Registry::new();
    registry
        .register(
            SchemaDefinition::new("Dog")
                .string("name")
                .pre("save", |_doc, next| {
                    async move { drop(next) }.boxed()
                }),
        )
        .unwrap();
    let (connection, _store) = connect(&registry).await;

    let mut dog = connection
        .model("Dog")
        .unwrap()
        .create(doc! {})
        .await
        .unwrap();

    assert!(matches!(dog.save().await, Err(ModelError::Hook(_))));
}

#[tokio::test]
async fn overrides_wrap_their_predecessor() {
    let log = Log::default();
    let (base_log, outer_log) = (log.clone(), log.clone());

    let mut registry = Registry::new();
    registry
        .register(
            SchemaDefinition::new("Dog")
                .string("name")
                .hook("bark", move |inner, doc, args| {
                    let log = base_log.clone();
                    async move {
                        log.push("bark");
                        inner(doc, args).await
                    }
                    .boxed()
                })
                .hook("bark", move |inner, doc, args| {
                    let log = outer_log.clone();
                    async move {
                        log.push("before");
                        inner(doc, args).await?;
                        log.push("after");
                        Ok(())
                    }
                    .boxed()
                }),
        )
        .unwrap();
    let (connection, _store) = connect(&registry).await;

    let mut dog = connection
        .model("Dog")
        .unwrap()
        .create(doc! {})
        .await
        .unwrap();
    dog.run("bark", HookArgs::Custom(Vec::new())).await.unwrap();

    assert_eq!(log.entries(), ["before", "bark", "after"]);
    assert!(matches!(
        dog.run("howl", HookArgs::None).await,
        Err(ModelError::UnknownMethod(name)) if name == "howl"
    ));
}

#[tokio::test]
async fn an_override_may_skip_the_default_handler() {
    let mut registry = Registry::new();
    registry
        .register(
            SchemaDefinition::new("Dog")
                .string("name")
                .hook("save", |_inner, _doc, _args| async { Ok(()) }.boxed()),
        )
        .unwrap();
    let (connection, store) = connect(&registry).await;

    let mut dog = connection
        .model("Dog")
        .unwrap()
        .create(doc! { "name": "Rex" })
        .await
        .unwrap();
    dog.save().await.unwrap();

    assert!(dog.is_new());
    assert_eq!(stored_count(&store, "dog").await, 0);
}

#[tokio::test]
async fn nested_pipelines_finish_before_the_outer_post() {
    let log = Log::default();
    let (outer_log, inner_log) = (log.clone(), log.clone());

    let mut registry = Registry::new();
    registry
        .register(
            SchemaDefinition::new("Dog")
                .string("name")
                .hook("outer", move |_inner, doc, _args| {
                    let log = outer_log.clone();
                    async move {
                        log.push("outer handler");
                        doc.run("inner", HookArgs::None).await?;
                        log.push("outer handler resumed");
                        Ok(())
                    }
                    .boxed()
                })
                .hook("inner", move |_inner, _doc, _args| {
                    let log = inner_log.clone();
                    async move {
                        log.push("inner handler");
                        Ok(())
                    }
                    .boxed()
                })
                .post("inner", logging_pre(&log, "inner post"))
                .post("outer", logging_pre(&log, "outer post")),
        )
        .unwrap();
    let (connection, _store) = connect(&registry).await;

    let mut dog = connection
        .model("Dog")
        .unwrap()
        .create(doc! {})
        .await
        .unwrap();
    dog.run("outer", HookArgs::None).await.unwrap();

    assert_eq!(
        log.entries(),
        [
            "outer handler",
            "inner handler",
            "inner post",
            "outer handler resumed",
            "outer post"
        ]
    );
}

#[tokio::test]
async fn init_hooks_run_on_create() {
    let mut registry = Registry::new();
    registry
        .register(
            SchemaDefinition::new("Dog")
                .string("name")
                .number("age")
                .post("init", |doc, next| {
                    if doc.try_get("age").ok().flatten().is_none() {
                        doc.set("age", 1).unwrap();
                    }
                    async move { next.proceed() }.boxed()
                }),
        )
        .unwrap();
    let (connection, _store) = connect(&registry).await;

    let dog = connection
        .model("Dog")
        .unwrap()
        .create(doc! { "name": "Rex" })
        .await
        .unwrap();

    assert_eq!(dog.get("age").unwrap(), Field::Value(Bson::Int32(1)));
}

#[tokio::test]
async fn methods_and_statics_are_callable() {
    let mut registry = Registry::new();
    registry
        .register(
            SchemaDefinition::new("Dog")
                .string("name")
                .method("greet", |doc, args| {
                    async move {
                        let name = doc.try_get("name")?.unwrap_or(Bson::Null);
                        let greeting = args
                            .first()
                            .and_then(Bson::as_str)
                            .unwrap_or("hello")
                            .to_string();
                        Ok(Bson::String(format!("{greeting}, {}", name.as_str().unwrap_or("?"))))
                    }
                    .boxed()
                })
                .static_fn("count", |model, _args| {
                    async move {
                        let found = model.find(doc! {}).all().await?;
                        Ok(Bson::Int64(found.len() as i64))
                    }
                    .boxed()
                }),
        )
        .unwrap();
    let (connection, _store) = connect(&registry).await;
    let dogs = connection.model("Dog").unwrap();

    let mut dog = dogs.create(doc! { "name": "Rex" }).await.unwrap();
    dog.save().await.unwrap();

    assert_eq!(
        dog.call("greet", vec![Bson::from("woof")]).await.unwrap(),
        Bson::from("woof, Rex")
    );
    assert_eq!(dogs.call_static("count", Vec::new()).await.unwrap(), Bson::Int64(1));
    assert!(matches!(
        dogs.call_static("missing", Vec::new()).await,
        Err(ModelError::UnknownMethod(_))
    ));
}

#[tokio::test]
async fn plugins_extend_the_definition() {
    fn timestamps(schema: SchemaDefinition, options: &Bson) -> SchemaDefinition {
        let field = options.as_str().unwrap_or("created").to_string();
        let key = field.clone();
        schema.date(&field).pre("save", move |doc, next| {
            if doc.is_new() {
                doc.set(&key, Bson::DateTime(bson::DateTime::from_millis(0))).unwrap();
            }
            async move { next.proceed() }.boxed()
        })
    }

    let mut registry = Registry::new();
    registry
        .register(
            SchemaDefinition::new("Dog")
                .string("name")
                .plugin(timestamps, &Bson::from("born")),
        )
        .unwrap();
    let (connection, _store) = connect(&registry).await;

    let mut dog = connection
        .model("Dog")
        .unwrap()
        .create(doc! { "name": "Rex" })
        .await
        .unwrap();
    dog.save().await.unwrap();

    assert_eq!(
        dog.get("born").unwrap(),
        Field::Value(Bson::DateTime(bson::DateTime::from_millis(0)))
    );
}
