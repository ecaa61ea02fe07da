//! 菜单按钮与键盘 - 业务能力层
//!
//! 按钮文案必须与 handle_text 里的匹配保持一字不差。

use serde_json::{json, Value};

pub const STUDENT_BTN_TEST: &str = "📝 Test topshirish";
pub const STUDENT_BTN_PAY: &str = "💳 To'lov holati";
pub const STUDENT_BTN_RESULTS: &str = "📊 Natijalarim";
pub const STUDENT_BTN_APPEAL: &str = "✉️ E'tiroz yuborish";

pub const PARENT_BTN_RESULTS: &str = "📘 Farzand natijalari";
pub const PARENT_BTN_DEBT: &str = "💸 Qarzdorlik";
pub const PARENT_BTN_APPEAL: &str = "✉️ E'tiroz yuborish";

pub const REJECT_TEXT: &str =
    "Raqamingiz ro'yxatdan topilmadi. Administratorga murojaat qiling.";

/// 学生菜单的全部按钮（申诉模式下用来区分按钮和申诉正文）
pub const STUDENT_BUTTONS: [&str; 4] = [
    STUDENT_BTN_TEST,
    STUDENT_BTN_PAY,
    STUDENT_BTN_RESULTS,
    STUDENT_BTN_APPEAL,
];

pub const PARENT_BUTTONS: [&str; 3] = [PARENT_BTN_RESULTS, PARENT_BTN_DEBT, PARENT_BTN_APPEAL];

/// 请求分享电话号码的键盘
pub fn phone_keyboard() -> Value {
    json!({
        "keyboard": [[{ "text": "📱 Telefon raqamni yuborish", "request_contact": true }]],
        "resize_keyboard": true
    })
}

/// 学生主菜单
pub fn student_menu_keyboard() -> Value {
    json!({
        "keyboard": [
            [{ "text": STUDENT_BTN_TEST }, { "text": STUDENT_BTN_PAY }],
            [{ "text": STUDENT_BTN_RESULTS }, { "text": STUDENT_BTN_APPEAL }]
        ],
        "resize_keyboard": true
    })
}

/// 家长主菜单
pub fn parent_menu_keyboard() -> Value {
    json!({
        "keyboard": [
            [{ "text": PARENT_BTN_RESULTS }, { "text": PARENT_BTN_DEBT }],
            [{ "text": PARENT_BTN_APPEAL }]
        ],
        "resize_keyboard": true
    })
}

/// 移除自定义键盘
pub fn remove_keyboard() -> Value {
    json!({ "remove_keyboard": true })
}

/// "打开测试"内联按钮，回调负载为 open_test:<testId>
pub fn open_test_keyboard(test_id: &str) -> Value {
    json!({
        "inline_keyboard": [[{
            "text": "📝 Testni ochish",
            "callback_data": format!("open_test:{test_id}")
        }]]
    })
}
