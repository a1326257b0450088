mod common;

use anyhow::Result;
use cashbox::application::{AppError, EntryUpdate, ErrorKind, NewEntry};
use cashbox::domain::{EntryDetails, IncomeSource, OutcomeCategory};
use common::{Books, balance_of, parse_date, test_service};
use uuid::Uuid;

#[tokio::test]
async fn test_single_account_scenario() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let books = Books::create(&service).await?;
    assert_eq!(balance_of(&service, &books.main).await?, 10000);

    let income = books.income(&service, 5000).await?;
    assert_eq!(balance_of(&service, &books.main).await?, 15000);

    let outcome = books.outcome(&service, 3000).await?;
    assert_eq!(balance_of(&service, &books.main).await?, 12000);

    service
        .update_entry(
            outcome.id,
            EntryUpdate {
                amount: Some(1000),
                ..EntryUpdate::default()
            },
        )
        .await?;
    assert_eq!(balance_of(&service, &books.main).await?, 14000);

    service.delete_entry(income.id).await?;
    assert_eq!(balance_of(&service, &books.main).await?, 9000);

    assert!(service.check_integrity().await?.is_ok());
    Ok(())
}

#[tokio::test]
async fn test_moving_outcome_between_accounts() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let books = Books::create(&service).await?;

    // Bring Main to 90.00 with a 10.00 outcome
    let outcome = books.outcome(&service, 1000).await?;
    assert_eq!(balance_of(&service, &books.main).await?, 9000);
    assert_eq!(balance_of(&service, &books.reserve).await?, 0);

    let moved = service
        .update_entry(
            outcome.id,
            EntryUpdate {
                cash_id: Some(books.reserve.id),
                ..EntryUpdate::default()
            },
        )
        .await?;

    assert_eq!(moved.cash_id, books.reserve.id);
    assert_eq!(balance_of(&service, &books.main).await?, 10000);
    assert_eq!(balance_of(&service, &books.reserve).await?, -1000);
    assert!(service.check_integrity().await?.is_ok());
    Ok(())
}

#[tokio::test]
async fn test_move_keeps_combined_balance() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let books = Books::create(&service).await?;
    let income = books.income(&service, 2550).await?;

    let combined_before =
        balance_of(&service, &books.main).await? + balance_of(&service, &books.reserve).await?;

    service
        .update_entry(
            income.id,
            EntryUpdate {
                cash_id: Some(books.reserve.id),
                ..EntryUpdate::default()
            },
        )
        .await?;

    let main = balance_of(&service, &books.main).await?;
    let reserve = balance_of(&service, &books.reserve).await?;
    assert_eq!(main, 10000);
    assert_eq!(reserve, 2550);
    assert_eq!(main + reserve, combined_before);
    Ok(())
}

#[tokio::test]
async fn test_move_and_change_amount_together() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let books = Books::create(&service).await?;
    let income = books.income(&service, 5000).await?;

    service
        .update_entry(
            income.id,
            EntryUpdate {
                cash_id: Some(books.reserve.id),
                amount: Some(7000),
                ..EntryUpdate::default()
            },
        )
        .await?;

    assert_eq!(balance_of(&service, &books.main).await?, 10000);
    assert_eq!(balance_of(&service, &books.reserve).await?, 7000);
    assert!(service.check_integrity().await?.is_ok());
    Ok(())
}

#[tokio::test]
async fn test_update_without_money_change_leaves_balance() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let books = Books::create(&service).await?;
    let outcome = books.outcome(&service, 1500).await?;

    let updated = service
        .update_entry(
            outcome.id,
            EntryUpdate {
                amount: Some(1500),
                date: Some(parse_date("2024-05-10")),
                description: Some("  Mop and bucket  ".into()),
                category: Some(OutcomeCategory::Maintenance),
                ..EntryUpdate::default()
            },
        )
        .await?;

    assert_eq!(balance_of(&service, &books.main).await?, 8500);
    assert_eq!(updated.date, parse_date("2024-05-10"));
    assert_eq!(
        updated.details,
        EntryDetails::Outcome {
            description: "Mop and bucket".into(),
            category: OutcomeCategory::Maintenance,
        }
    );

    let stored = service.get_entry(outcome.id).await?.unwrap();
    assert_eq!(stored.details, updated.details);
    assert_eq!(stored.amount, 1500);
    Ok(())
}

#[tokio::test]
async fn test_income_person_attribution() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let books = Books::create(&service).await?;
    let ana = service.create_person("Ana".into()).await?;

    let income = service
        .create_entry(
            NewEntry::income(
                books.main.id,
                books.week.id,
                parse_date("2024-05-07"),
                2000,
                IncomeSource::Donation,
            )
            .with_person(ana.id),
        )
        .await?;
    assert_eq!(income.person_id(), Some(ana.id));

    let detached = service
        .update_entry(
            income.id,
            EntryUpdate {
                person_id: Some(None),
                source: Some(IncomeSource::Sale),
                ..EntryUpdate::default()
            },
        )
        .await?;
    assert_eq!(detached.person_id(), None);
    assert_eq!(balance_of(&service, &books.main).await?, 12000);
    Ok(())
}

#[tokio::test]
async fn test_delete_missing_entry_is_not_found() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let books = Books::create(&service).await?;
    let income = books.income(&service, 5000).await?;

    service.delete_entry(income.id).await?;
    let second = service.delete_entry(income.id).await;

    assert!(matches!(second, Err(AppError::EntryNotFound(_))));
    assert_eq!(balance_of(&service, &books.main).await?, 10000);
    Ok(())
}

#[tokio::test]
async fn test_update_missing_entry_is_not_found() -> Result<()> {
    let (service, _temp) = test_service().await?;
    Books::create(&service).await?;

    let result = service
        .update_entry(
            Uuid::new_v4(),
            EntryUpdate {
                amount: Some(100),
                ..EntryUpdate::default()
            },
        )
        .await;

    let err = result.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
    Ok(())
}

#[tokio::test]
async fn test_create_rejects_invalid_amounts() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let books = Books::create(&service).await?;

    for amount in [0, -500] {
        let result = books.income(&service, amount).await;
        let err = result.unwrap_err().downcast::<AppError>()?;
        assert!(matches!(err, AppError::InvalidAmount(_)));
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    assert_eq!(balance_of(&service, &books.main).await?, 10000);
    assert!(service.list_entries(&Default::default()).await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_create_rejects_blank_description() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let books = Books::create(&service).await?;

    let result = service
        .create_entry(NewEntry::outcome(
            books.main.id,
            books.week.id,
            parse_date("2024-05-07"),
            100,
            "   ",
            OutcomeCategory::Other,
        ))
        .await;

    assert!(matches!(result, Err(AppError::MissingField("description"))));
    Ok(())
}

#[tokio::test]
async fn test_create_with_unknown_references() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let books = Books::create(&service).await?;

    let missing_cash = service
        .create_entry(NewEntry::income(
            Uuid::new_v4(),
            books.week.id,
            parse_date("2024-05-07"),
            100,
            IncomeSource::Other,
        ))
        .await;
    assert!(matches!(missing_cash, Err(AppError::CashAccountNotFound(_))));

    let missing_week = service
        .create_entry(NewEntry::income(
            books.main.id,
            Uuid::new_v4(),
            parse_date("2024-05-07"),
            100,
            IncomeSource::Other,
        ))
        .await;
    assert!(matches!(missing_week, Err(AppError::WeekNotFound(_))));

    let missing_person = service
        .create_entry(
            NewEntry::income(
                books.main.id,
                books.week.id,
                parse_date("2024-05-07"),
                100,
                IncomeSource::Other,
            )
            .with_person(Uuid::new_v4()),
        )
        .await;
    assert!(matches!(missing_person, Err(AppError::PersonNotFound(_))));

    assert_eq!(balance_of(&service, &books.main).await?, 10000);
    assert!(service.list_entries(&Default::default()).await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_move_to_unknown_account_changes_nothing() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let books = Books::create(&service).await?;
    let outcome = books.outcome(&service, 1000).await?;

    let result = service
        .update_entry(
            outcome.id,
            EntryUpdate {
                cash_id: Some(Uuid::new_v4()),
                amount: Some(4000),
                ..EntryUpdate::default()
            },
        )
        .await;

    assert!(matches!(result, Err(AppError::CashAccountNotFound(_))));
    assert_eq!(balance_of(&service, &books.main).await?, 9000);
    let stored = service.get_entry(outcome.id).await?.unwrap();
    assert_eq!(stored.cash_id, books.main.id);
    assert_eq!(stored.amount, 1000);
    Ok(())
}

#[tokio::test]
async fn test_update_to_unknown_week_changes_nothing() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let books = Books::create(&service).await?;
    let outcome = books.outcome(&service, 1000).await?;

    let result = service
        .update_entry(
            outcome.id,
            EntryUpdate {
                week_id: Some(Uuid::new_v4()),
                amount: Some(2500),
                ..EntryUpdate::default()
            },
        )
        .await;

    assert!(matches!(result, Err(AppError::WeekNotFound(_))));
    assert_eq!(balance_of(&service, &books.main).await?, 9000);
    let stored = service.get_entry(outcome.id).await?.unwrap();
    assert_eq!(stored.week_id, books.week.id);
    assert_eq!(stored.amount, 1000);
    Ok(())
}

#[tokio::test]
async fn test_update_rejects_fields_of_other_kind() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let books = Books::create(&service).await?;
    let income = books.income(&service, 1000).await?;
    let outcome = books.outcome(&service, 1000).await?;

    let on_income = service
        .update_entry(
            income.id,
            EntryUpdate {
                amount: Some(9000),
                category: Some(OutcomeCategory::Utilities),
                ..EntryUpdate::default()
            },
        )
        .await;
    assert!(matches!(
        on_income,
        Err(AppError::InvalidField {
            field: "category",
            ..
        })
    ));

    let on_outcome = service
        .update_entry(
            outcome.id,
            EntryUpdate {
                source: Some(IncomeSource::Sale),
                ..EntryUpdate::default()
            },
        )
        .await;
    assert!(matches!(
        on_outcome,
        Err(AppError::InvalidField { field: "source", .. })
    ));

    // Neither rejected update touched the balance
    assert_eq!(balance_of(&service, &books.main).await?, 10000);
    Ok(())
}

#[tokio::test]
async fn test_update_rejects_non_positive_amount() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let books = Books::create(&service).await?;
    let income = books.income(&service, 1000).await?;

    let result = service
        .update_entry(
            income.id,
            EntryUpdate {
                amount: Some(0),
                ..EntryUpdate::default()
            },
        )
        .await;

    assert!(matches!(result, Err(AppError::InvalidAmount(_))));
    assert_eq!(balance_of(&service, &books.main).await?, 11000);
    Ok(())
}

#[tokio::test]
async fn test_balance_read_is_stable() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let books = Books::create(&service).await?;
    books.income(&service, 1234).await?;

    let first = balance_of(&service, &books.main).await?;
    let second = balance_of(&service, &books.main).await?;
    assert_eq!(first, second);
    assert_eq!(first, 11234);
    Ok(())
}

#[tokio::test]
async fn test_invariant_over_mixed_operations() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let books = Books::create(&service).await?;

    let mut live = Vec::new();
    for (i, amount) in [1500, 250, 9999, 1, 4200, 730].into_iter().enumerate() {
        let entry = if i % 2 == 0 {
            books.income(&service, amount).await?
        } else {
            books.outcome(&service, amount).await?
        };
        live.push(entry);
    }

    // Shuffle things around: change amounts, move some, delete others
    service
        .update_entry(
            live[0].id,
            EntryUpdate {
                amount: Some(300),
                ..EntryUpdate::default()
            },
        )
        .await?;
    service
        .update_entry(
            live[1].id,
            EntryUpdate {
                cash_id: Some(books.reserve.id),
                ..EntryUpdate::default()
            },
        )
        .await?;
    service
        .update_entry(
            live[2].id,
            EntryUpdate {
                cash_id: Some(books.reserve.id),
                amount: Some(10),
                ..EntryUpdate::default()
            },
        )
        .await?;
    service.delete_entry(live[3].id).await?;
    service.delete_entry(live[4].id).await?;

    // Main: 100.00 + 3.00 - 7.30 ; Reserve: 0.00 - 2.50 + 0.10
    assert_eq!(balance_of(&service, &books.main).await?, 10000 + 300 - 730);
    assert_eq!(balance_of(&service, &books.reserve).await?, -250 + 10);

    let report = service.check_integrity().await?;
    assert!(report.is_ok(), "mismatches: {:?}", report.mismatches);
    assert_eq!(report.income_count, 2);
    assert_eq!(report.outcome_count, 2);
    Ok(())
}
