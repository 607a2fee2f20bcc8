#[cfg(test)]
mod tests {
    use coop_promise::{defer, yield_now, Deferred, Error, Promise, Reason, Scheduler};
    use std::{cell::RefCell, rc::Rc};

    fn record(promise: &Promise<u32>, log: &Rc<RefCell<Vec<String>>>) {
        let (ok, err) = (log.clone(), log.clone());
        let _ = promise.then_or_else(
            move |v| {
                ok.borrow_mut().push(format!("value {v}"));
                Ok(())
            },
            move |e| {
                err.borrow_mut().push(format!("error {e}"));
                Ok(())
            },
        );
    }

    #[test]
    fn test_reactions_before_and_after_completion_agree() {
        let scheduler = Scheduler::new();
        let handle = scheduler.handle();

        let early = Rc::new(RefCell::new(Vec::new()));
        let before: Deferred<u32> = defer(&handle);
        record(&before.promise(), &early);
        before.resolve(3).unwrap();
        scheduler.run_until_stalled();

        let late = Rc::new(RefCell::new(Vec::new()));
        let after: Deferred<u32> = defer(&handle);
        after.resolve(3).unwrap();
        scheduler.run_until_stalled();
        record(&after.promise(), &late);
        scheduler.run_until_stalled();

        assert_eq!(*early.borrow(), ["value 3"]);
        assert_eq!(*early.borrow(), *late.borrow());
    }

    #[test]
    fn test_second_completion_fails() {
        let scheduler = Scheduler::new();
        let deferred = Deferred::<u32>::new(&scheduler.handle());
        deferred.reject(Reason::msg("foo")).unwrap();
        assert_eq!(deferred.resolve(1), Err(Error::AlreadyCompleted));
        assert_eq!(
            deferred.reject(Reason::msg("bar")),
            Err(Error::AlreadyCompleted)
        );
        let other = Promise::<u32>::resolved(&scheduler.handle(), 2);
        assert_eq!(deferred.resolve_with(other), Err(Error::AlreadyCompleted));
        scheduler.run_until_stalled();
        assert_eq!(deferred.promise().error(), Some(Reason::msg("foo")));
    }

    #[test]
    fn test_resolution_from_nested_tasks() {
        let scheduler = Scheduler::new();
        let handle = scheduler.handle();
        let deferred = Rc::new(Deferred::<u32>::new(&handle));
        let promise = deferred.promise();

        let outer = handle.clone();
        let completer = deferred.clone();
        handle
            .schedule(move || {
                outer
                    .spawn(async move {
                        yield_now().await;
                        completer.resolve(11).unwrap();
                    })
                    .unwrap();
            })
            .unwrap();

        scheduler.run_until_stalled();
        assert!(deferred.is_complete());
        assert_eq!(promise.value(), Some(11));
    }

    #[test]
    fn test_resolving_with_a_pending_promise() {
        let scheduler = Scheduler::new();
        let handle = scheduler.handle();
        let inner = Deferred::<u32>::new(&handle);
        let outer = Deferred::<u32>::new(&handle);
        outer.resolve_with(inner.promise()).unwrap();
        scheduler.run_until_stalled();
        assert!(outer.is_complete());
        assert!(outer.promise().is_pending());

        inner.resolve(6).unwrap();
        scheduler.run_until_stalled();
        assert_eq!(outer.promise().value(), Some(6));
    }

    #[test]
    fn test_await_deferred_from_another_task() {
        let scheduler = Scheduler::new();
        let handle = scheduler.handle();
        let deferred = Deferred::<u32>::new(&handle);
        let promise = deferred.promise();
        handle
            .spawn(async move {
                yield_now().await;
                deferred.resolve(42).unwrap();
            })
            .unwrap();
        assert_eq!(scheduler.block_on(async move { promise.await }), Ok(Ok(42)));
    }
}
