//! SBA 1919 / SBA 413 字段表与跨文档映射表

use crate::forms::mapper::{EntityOption, UnifiedFieldMapping};
use crate::forms::schema::FieldDefinition;

pub const SBA_1919_FIELDS: &[FieldDefinition] = &[
    FieldDefinition::text("business_name", "Applicant Legal Business Name", true),
    FieldDefinition::text("dba_name", "DBA or Tradename", false),
    FieldDefinition::text("business_tin", "Business TIN (EIN, SSN)", true),
    FieldDefinition::text("business_phone", "Primary Business Phone", true),
    FieldDefinition::text("business_address", "Business Street Address", true),
    FieldDefinition::text("business_city", "Business City", true),
    FieldDefinition::text("business_state", "Business State", true),
    FieldDefinition::text("business_zip", "Business Zip", true),
    FieldDefinition::checkbox("entity_sole_prop", "Sole Proprietor"),
    FieldDefinition::checkbox("entity_partnership", "Partnership"),
    FieldDefinition::checkbox("entity_c_corp", "C-Corporation"),
    FieldDefinition::checkbox("entity_s_corp", "S-Corporation"),
    FieldDefinition::checkbox("entity_llc", "LLC"),
    FieldDefinition::text("year_established", "Year Business Began Operations", false),
    FieldDefinition::text("number_of_employees", "Number of Employees", true),
    FieldDefinition::text("owner_name", "Owner Full Name", true),
    FieldDefinition::text("owner_title", "Owner Title", false),
    FieldDefinition::text("owner_ownership_pct", "Ownership Percentage", true),
    FieldDefinition::text("owner_tin", "Owner TIN (SSN)", true),
    FieldDefinition::text("owner_home_address", "Owner Home Address", true),
    FieldDefinition::text("owner_email", "Owner Email", false),
    FieldDefinition::text("loan_amount", "Loan Amount Requested", true),
    FieldDefinition::text("use_of_proceeds", "Purpose of the Loan", false),
    FieldDefinition::checkbox("owner_us_citizen", "U.S. Citizen"),
];

pub const SBA_413_FIELDS: &[FieldDefinition] = &[
    FieldDefinition::text("name", "Name", true),
    FieldDefinition::text("business_phone", "Business Phone", false),
    FieldDefinition::text("home_address", "Residence Address", true),
    FieldDefinition::text("home_city", "City", true),
    FieldDefinition::text("home_state", "State", true),
    FieldDefinition::text("home_zip", "Zip Code", true),
    FieldDefinition::text("residence_phone", "Residence Phone", false),
    FieldDefinition::text("business_name_of_applicant", "Business Name of Applicant/Borrower", true),
    FieldDefinition::checkbox("business_type_corporation", "Corporation"),
    FieldDefinition::checkbox("business_type_s_corp", "S-Corp"),
    FieldDefinition::checkbox("business_type_llc", "LLC"),
    FieldDefinition::checkbox("business_type_partnership", "Partnership"),
    FieldDefinition::checkbox("business_type_sole_prop", "Sole Proprietor"),
    FieldDefinition::text("cash_on_hand", "Cash on Hand and in Banks", true),
    FieldDefinition::text("savings_accounts", "Savings Accounts", false),
    FieldDefinition::text("ira_retirement", "IRA or Other Retirement Account", false),
    FieldDefinition::text("real_estate_value", "Real Estate", false),
    FieldDefinition::text("total_assets", "Total Assets", true),
    FieldDefinition::text("mortgages_on_real_estate", "Mortgages on Real Estate", false),
    FieldDefinition::text("total_liabilities", "Total Liabilities", true),
    FieldDefinition::text("net_worth", "Net Worth", true),
    FieldDefinition::text("salary_income", "Salary", false),
    FieldDefinition::text("signature_date", "Date Signed", true),
];

const fn both(
    unified_name: &'static str,
    prompt: &'static str,
    d1: &'static str,
    d2: &'static str,
) -> UnifiedFieldMapping {
    UnifiedFieldMapping {
        unified_name,
        prompt,
        sba_1919: Some(d1),
        sba_413: Some(d2),
    }
}

const fn only_1919(unified_name: &'static str, prompt: &'static str, d1: &'static str) -> UnifiedFieldMapping {
    UnifiedFieldMapping {
        unified_name,
        prompt,
        sba_1919: Some(d1),
        sba_413: None,
    }
}

const fn only_413(unified_name: &'static str, prompt: &'static str, d2: &'static str) -> UnifiedFieldMapping {
    UnifiedFieldMapping {
        unified_name,
        prompt,
        sba_1919: None,
        sba_413: Some(d2),
    }
}

pub const UNIFIED_FIELDS: &[UnifiedFieldMapping] = &[
    both("business_name", "What is the legal name of your business?", "business_name", "business_name_of_applicant"),
    both("owner_name", "What is your full legal name?", "owner_name", "name"),
    both("business_phone", "What is the best business phone number?", "business_phone", "business_phone"),
    both("home_address", "What is your home street address?", "owner_home_address", "home_address"),
    only_1919("dba_name", "Does the business operate under a different trade name?", "dba_name"),
    only_1919("business_tin", "What is the business EIN?", "business_tin"),
    only_1919("business_address", "What is the business street address?", "business_address"),
    only_1919("business_city", "Which city is the business located in?", "business_city"),
    only_1919("business_state", "Which state is the business located in?", "business_state"),
    only_1919("business_zip", "What is the business zip code?", "business_zip"),
    only_1919("year_established", "What year did the business begin operations?", "year_established"),
    only_1919("number_of_employees", "How many employees does the business have?", "number_of_employees"),
    only_1919("owner_title", "What is your title in the business?", "owner_title"),
    only_1919("ownership_pct", "What percentage of the business do you own?", "owner_ownership_pct"),
    only_1919("owner_ssn", "What is your Social Security number?", "owner_tin"),
    only_1919("email", "What email address should we use?", "owner_email"),
    only_1919("loan_amount", "How much are you looking to borrow?", "loan_amount"),
    only_1919("use_of_proceeds", "What will the loan be used for?", "use_of_proceeds"),
    only_1919("us_citizen", "Are you a U.S. citizen?", "owner_us_citizen"),
    only_413("home_city", "Which city do you live in?", "home_city"),
    only_413("home_state", "Which state do you live in?", "home_state"),
    only_413("home_zip", "What is your home zip code?", "home_zip"),
    only_413("residence_phone", "What is your home phone number?", "residence_phone"),
    only_413("cash_on_hand", "How much cash do you have on hand and in banks?", "cash_on_hand"),
    only_413("savings_accounts", "How much do you hold in savings accounts?", "savings_accounts"),
    only_413("retirement_accounts", "What is the value of your IRA or retirement accounts?", "ira_retirement"),
    only_413("real_estate_value", "What is the value of real estate you own?", "real_estate_value"),
    only_413("total_assets", "What are your total assets?", "total_assets"),
    only_413("mortgages", "How much do you owe on real estate mortgages?", "mortgages_on_real_estate"),
    only_413("total_liabilities", "What are your total liabilities?", "total_liabilities"),
    only_413("net_worth", "What is your net worth?", "net_worth"),
    only_413("salary_income", "What is your annual salary?", "salary_income"),
    only_413("signature_date", "What date should appear next to your signature?", "signature_date"),
];

/// 企业类型复选框组：两份文档内各自互斥
pub const ENTITY_TYPE_OPTIONS: &[EntityOption] = &[
    EntityOption {
        option_name: "sole_proprietor",
        sba_1919: "entity_sole_prop",
        sba_413: "business_type_sole_prop",
    },
    EntityOption {
        option_name: "partnership",
        sba_1919: "entity_partnership",
        sba_413: "business_type_partnership",
    },
    EntityOption {
        option_name: "c_corporation",
        sba_1919: "entity_c_corp",
        sba_413: "business_type_corporation",
    },
    EntityOption {
        option_name: "s_corporation",
        sba_1919: "entity_s_corp",
        sba_413: "business_type_s_corp",
    },
    EntityOption {
        option_name: "llc",
        sba_1919: "entity_llc",
        sba_413: "business_type_llc",
    },
];
